/// A single primary or replica connection and its blacklist state

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::transport::{QueryResult, SqlValue, Transport, TransportError};
use super::{NodeRole, NodeState};

/// Mutable health fields, guarded per node
#[derive(Debug)]
struct Health {
    state: NodeState,
    blacklisted_until: Option<Instant>,
    consecutive_failures: u32,
}

/// One physical connection owned by the pool
pub struct Node {
    id: String,
    role: NodeRole,
    weight: u32,
    cooldown: Duration,
    failure_threshold: u32,
    transport: Arc<dyn Transport>,
    health: Mutex<Health>,
}

/// Point-in-time copy of a node's health
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSnapshot {
    pub id: String,
    pub role: NodeRole,
    pub weight: u32,
    pub state: NodeState,
    pub consecutive_failures: u32,
    /// Time left before the node may be probed again
    pub cooldown_remaining: Option<Duration>,
}

impl Node {
    pub fn new<S: Into<String>>(
        id: S,
        role: NodeRole,
        weight: u32,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            id: id.into(),
            role,
            weight: weight.max(1),
            cooldown: Duration::from_secs(30),
            failure_threshold: 1,
            transport,
            health: Mutex::new(Health {
                state: NodeState::Up,
                blacklisted_until: None,
                consecutive_failures: 0,
            }),
        }
    }

    /// Set the blacklist policy (cooldown and consecutive-failure threshold)
    pub fn with_blacklist_policy(mut self, cooldown: Duration, failure_threshold: u32) -> Self {
        self.cooldown = cooldown;
        self.failure_threshold = failure_threshold.max(1);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn role(&self) -> NodeRole {
        self.role
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    // A poisoned lock only means another caller panicked mid-update of plain
    // fields; the data is still usable.
    fn health(&self) -> MutexGuard<'_, Health> {
        self.health.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> NodeState {
        self.health().state
    }

    pub fn is_up(&self) -> bool {
        self.state() == NodeState::Up
    }

    /// Blacklisted and the cooldown has run out, so a probe is allowed
    pub fn cooldown_elapsed(&self) -> bool {
        let health = self.health();
        match (health.state, health.blacklisted_until) {
            (NodeState::Blacklisted, Some(until)) => Instant::now() >= until,
            (NodeState::Blacklisted, None) => true,
            (NodeState::Up, _) => false,
        }
    }

    /// Run a statement on the underlying transport
    ///
    /// Health is not touched here; the pool applies the outcome.
    pub async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult, TransportError> {
        debug!("Executing on {} ({}): {}", self.id, self.role, sql);
        self.transport.execute(sql, params).await
    }

    /// Record a connectivity failure, blacklisting once the threshold is reached
    pub fn mark_failure(&self) {
        let mut health = self.health();
        health.consecutive_failures = health.consecutive_failures.saturating_add(1);

        if health.consecutive_failures >= self.failure_threshold {
            let was_up = health.state == NodeState::Up;
            health.state = NodeState::Blacklisted;
            health.blacklisted_until = Some(Instant::now() + self.cooldown);
            if was_up {
                warn!(
                    "Blacklisting {} {} for {:?} after {} failure(s)",
                    self.role, self.id, self.cooldown, health.consecutive_failures
                );
            }
        }
    }

    /// Record a successful call; lifting a blacklist is left to the probe
    pub fn mark_success(&self) {
        self.health().consecutive_failures = 0;
    }

    /// Reconnect and check the connection
    pub async fn probe(&self) -> bool {
        self.transport.reconnect().await && self.transport.is_connected().await
    }

    /// Probe a blacklisted node whose cooldown elapsed, restoring it on success
    ///
    /// Returns whether the node is Up afterwards. Nodes still cooling down are
    /// not probed.
    pub async fn try_recover(&self) -> bool {
        match self.state() {
            NodeState::Up => return true,
            NodeState::Blacklisted if !self.cooldown_elapsed() => return false,
            NodeState::Blacklisted => {}
        }

        if self.probe().await {
            let mut health = self.health();
            health.state = NodeState::Up;
            health.blacklisted_until = None;
            health.consecutive_failures = 0;
            info!("{} {} is back in rotation", self.role, self.id);
            true
        } else {
            // Still down, wait out another cooldown before the next probe
            self.health().blacklisted_until = Some(Instant::now() + self.cooldown);
            debug!("Probe of {} failed, cooldown re-armed", self.id);
            false
        }
    }

    pub fn snapshot(&self) -> NodeSnapshot {
        let health = self.health();
        let now = Instant::now();
        NodeSnapshot {
            id: self.id.clone(),
            role: self.role,
            weight: self.weight,
            state: health.state,
            consecutive_failures: health.consecutive_failures,
            cooldown_remaining: health
                .blacklisted_until
                .filter(|until| *until > now)
                .map(|until| until - now),
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("weight", &self.weight)
            .field("state", &self.state())
            .finish()
    }
}
