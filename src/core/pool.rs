/// Health-aware candidate selection over one primary and weighted replicas

use rand::Rng;
use std::sync::Arc;
use tracing::{debug, warn};

use super::node::{Node, NodeSnapshot};
use super::transport::TransportFactory;
use super::{NodeRole, NodeState};
use crate::config::{Config, ConfigError};
use crate::error::{RamalError, RamalResult};
use crate::health::{HealthReport, HealthStatus, NodeHealth};

/// What kind of node a statement needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Forced to the primary; never substituted
    Primary,
    /// Any healthy replica, optionally preferring one by id
    Replica { preferred: Option<String> },
}

/// Result of running a statement on a node, as far as health is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    ConnectionFailed,
}

/// Owns the primary node and the replica set
#[derive(Debug)]
pub struct ConnectionPool {
    primary: Arc<Node>,
    replicas: Vec<Arc<Node>>,
}

impl ConnectionPool {
    /// Create a pool, checking roles and that at least one replica exists
    pub fn new(primary: Node, replicas: Vec<Node>) -> Result<Self, ConfigError> {
        if primary.role() != NodeRole::Primary {
            return Err(ConfigError::ValidationError(format!(
                "node {} is not a primary",
                primary.id()
            )));
        }
        if replicas.is_empty() {
            return Err(ConfigError::ValidationError(
                "at least one replica node is required".to_string(),
            ));
        }
        if let Some(node) = replicas.iter().find(|n| n.role() != NodeRole::Replica) {
            return Err(ConfigError::ValidationError(format!(
                "node {} is not a replica",
                node.id()
            )));
        }

        Ok(Self {
            primary: Arc::new(primary),
            replicas: replicas.into_iter().map(Arc::new).collect(),
        })
    }

    /// Build every node from configuration, opening transports through the factory
    pub fn from_config(config: &Config, factory: &dyn TransportFactory) -> RamalResult<Self> {
        config.validate()?;

        let mut primary = None;
        let mut replicas = Vec::new();

        for (node_config, id) in config.nodes.iter().zip(config.node_ids()) {
            let transport = factory.connect(node_config).map_err(|e| {
                RamalError::internal(format!("failed to open transport for {}: {}", id, e))
            })?;
            let node = Node::new(id, node_config.role, node_config.weight, transport)
                .with_blacklist_policy(
                    config.blacklist.cooldown(),
                    config.blacklist.failure_threshold,
                );

            match node_config.role {
                NodeRole::Primary => primary = Some(node),
                NodeRole::Replica => replicas.push(node),
            }
        }

        let primary = primary.ok_or_else(|| RamalError::internal("validated config has no primary"))?;
        Ok(Self::new(primary, replicas)?)
    }

    pub fn primary(&self) -> &Arc<Node> {
        &self.primary
    }

    pub fn replicas(&self) -> &[Arc<Node>] {
        &self.replicas
    }

    /// All nodes, primary first
    pub fn nodes(&self) -> impl Iterator<Item = &Arc<Node>> {
        std::iter::once(&self.primary).chain(self.replicas.iter())
    }

    pub fn node(&self, id: &str) -> Option<&Arc<Node>> {
        self.nodes().find(|n| n.id() == id)
    }

    /// Ordered candidates for a target
    pub async fn candidates(&self, target: &Target) -> Vec<Arc<Node>> {
        match target {
            Target::Primary => {
                if !self.primary.is_up() {
                    // Primary has no alternate; it is targeted whatever the probe says
                    self.primary.try_recover().await;
                }
                vec![Arc::clone(&self.primary)]
            }
            Target::Replica { preferred } => self.replica_candidates(preferred.as_deref()).await,
        }
    }

    async fn replica_candidates(&self, preferred: Option<&str>) -> Vec<Arc<Node>> {
        let mut eligible = Vec::with_capacity(self.replicas.len());
        for replica in &self.replicas {
            // A failed probe re-arms the cooldown, so each replica is probed at most once per cooldown
            if replica.is_up() || (replica.cooldown_elapsed() && replica.try_recover().await) {
                eligible.push(Arc::clone(replica));
            }
        }
        let mut candidates = weighted_permutation(eligible);

        if candidates.is_empty() {
            warn!("No replica available, falling back to primary {}", self.primary.id());
            return vec![Arc::clone(&self.primary)];
        }

        if let Some(preferred) = preferred {
            if let Some(pos) = candidates.iter().position(|n| n.id() == preferred) {
                let node = candidates.remove(pos);
                candidates.insert(0, node);
            }
        }

        debug!(
            "Replica candidates: {:?}",
            candidates.iter().map(|n| n.id()).collect::<Vec<_>>()
        );
        candidates
    }

    /// Apply the health consequence of a call
    pub fn on_result(&self, node: &Node, outcome: Outcome) {
        match outcome {
            Outcome::Succeeded => node.mark_success(),
            Outcome::ConnectionFailed => node.mark_failure(),
        }
    }

    /// Whether any node could take traffic right now without a probe
    pub fn has_available_node(&self) -> bool {
        self.nodes().any(|n| n.is_up())
    }

    /// Probe every node, never failing on individual nodes
    ///
    /// Up nodes that fail their probe are marked failed. Blacklisted nodes are
    /// only probed once their cooldown has elapsed.
    pub async fn verify(&self) -> HealthReport {
        let mut nodes = Vec::new();

        for node in self.nodes() {
            let status = if node.is_up() {
                if node.probe().await {
                    HealthStatus::Healthy
                } else {
                    node.mark_failure();
                    HealthStatus::Unhealthy {
                        reason: "probe failed".to_string(),
                    }
                }
            } else if node.try_recover().await {
                HealthStatus::Healthy
            } else {
                HealthStatus::Blacklisted {
                    remaining: node.snapshot().cooldown_remaining.unwrap_or_default(),
                }
            };

            nodes.push(NodeHealth {
                id: node.id().to_string(),
                role: node.role(),
                status,
            });
        }

        HealthReport { nodes }
    }

    /// Current health without probing anything
    pub fn health_report(&self) -> HealthReport {
        let nodes = self
            .snapshot()
            .into_iter()
            .map(|snapshot| NodeHealth {
                status: match snapshot.state {
                    NodeState::Up => HealthStatus::Healthy,
                    NodeState::Blacklisted => HealthStatus::Blacklisted {
                        remaining: snapshot.cooldown_remaining.unwrap_or_default(),
                    },
                },
                id: snapshot.id,
                role: snapshot.role,
            })
            .collect();
        HealthReport { nodes }
    }

    pub fn snapshot(&self) -> Vec<NodeSnapshot> {
        self.nodes().map(|n| n.snapshot()).collect()
    }
}

/// Order nodes so that each position is drawn with probability proportional to weight
///
/// Uses exponential keys (Efraimidis-Spirakis): key = u^(1/w), largest first.
fn weighted_permutation(nodes: Vec<Arc<Node>>) -> Vec<Arc<Node>> {
    if nodes.len() < 2 {
        return nodes;
    }

    let mut rng = rand::thread_rng();
    let mut keyed: Vec<(f64, Arc<Node>)> = nodes
        .into_iter()
        .map(|node| {
            let u: f64 = rng.gen_range(f64::EPSILON..1.0);
            (u.powf(1.0 / node.weight() as f64), node)
        })
        .collect();

    keyed.sort_by(|a, b| b.0.total_cmp(&a.0));
    keyed.into_iter().map(|(_, node)| node).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;
    use crate::core::transport::{QueryResult, SqlValue, Transport, TransportError};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    struct SwitchTransport {
        up: AtomicBool,
    }

    impl SwitchTransport {
        fn new(up: bool) -> Arc<Self> {
            Arc::new(Self {
                up: AtomicBool::new(up),
            })
        }
    }

    #[async_trait]
    impl Transport for SwitchTransport {
        async fn execute(&self, _sql: &str, _params: &[SqlValue]) -> Result<QueryResult, TransportError> {
            if self.up.load(Ordering::SeqCst) {
                Ok(QueryResult::default())
            } else {
                Err(TransportError::connectivity("closed connection"))
            }
        }

        async fn reconnect(&self) -> bool {
            self.up.load(Ordering::SeqCst)
        }

        async fn is_connected(&self) -> bool {
            self.up.load(Ordering::SeqCst)
        }
    }

    fn build_pool(weights: &[u32]) -> (ConnectionPool, Vec<Arc<SwitchTransport>>) {
        let mut transports = vec![SwitchTransport::new(true)];
        let primary = Node::new("primary", NodeRole::Primary, 1, transports[0].clone());
        let replicas = weights
            .iter()
            .enumerate()
            .map(|(i, weight)| {
                let transport = SwitchTransport::new(true);
                transports.push(Arc::clone(&transport));
                Node::new(format!("replica-{}", i + 1), NodeRole::Replica, *weight, transport)
                    .with_blacklist_policy(Duration::from_secs(30), 1)
            })
            .collect();
        (ConnectionPool::new(primary, replicas).unwrap(), transports)
    }

    fn ids(nodes: &[Arc<Node>]) -> Vec<&str> {
        nodes.iter().map(|n| n.id()).collect()
    }

    #[test]
    fn test_pool_requires_replica() {
        let primary = Node::new("primary", NodeRole::Primary, 1, SwitchTransport::new(true));
        assert!(ConnectionPool::new(primary, vec![]).is_err());

        let primary = Node::new("p", NodeRole::Replica, 1, SwitchTransport::new(true));
        let replica = Node::new("r", NodeRole::Replica, 1, SwitchTransport::new(true));
        assert!(ConnectionPool::new(primary, vec![replica]).is_err());
    }

    #[tokio::test]
    async fn test_primary_target_is_never_substituted() {
        let (pool, _) = build_pool(&[1, 1]);
        pool.primary().mark_failure();

        let candidates = pool.candidates(&Target::Primary).await;
        assert_eq!(ids(&candidates), vec!["primary"]);
    }

    #[tokio::test]
    async fn test_replica_target_lists_only_up_replicas() {
        let (pool, _) = build_pool(&[1, 1, 1]);
        pool.on_result(&pool.replicas()[1], Outcome::ConnectionFailed);

        let candidates = pool.candidates(&Target::Replica { preferred: None }).await;
        let mut found = ids(&candidates);
        found.sort();
        assert_eq!(found, vec!["replica-1", "replica-3"]);
    }

    #[tokio::test]
    async fn test_preferred_replica_goes_first() {
        let (pool, _) = build_pool(&[1, 1, 1]);
        for _ in 0..20 {
            let candidates = pool
                .candidates(&Target::Replica {
                    preferred: Some("replica-2".to_string()),
                })
                .await;
            assert_eq!(candidates[0].id(), "replica-2");
            assert_eq!(candidates.len(), 3);
        }
    }

    #[tokio::test]
    async fn test_falls_back_to_primary_when_replicas_cooling_down() {
        let (pool, _) = build_pool(&[1, 1]);
        for replica in pool.replicas() {
            pool.on_result(replica, Outcome::ConnectionFailed);
        }

        let candidates = pool.candidates(&Target::Replica { preferred: None }).await;
        assert_eq!(ids(&candidates), vec!["primary"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probes_replicas_after_cooldown() {
        let (pool, transports) = build_pool(&[1, 1]);
        for replica in pool.replicas() {
            pool.on_result(replica, Outcome::ConnectionFailed);
        }
        // replica-2 stays down
        transports[2].up.store(false, Ordering::SeqCst);

        tokio::time::advance(Duration::from_secs(31)).await;
        let candidates = pool.candidates(&Target::Replica { preferred: None }).await;
        assert_eq!(ids(&candidates), vec!["replica-1"]);
        assert_eq!(pool.replicas()[0].state(), NodeState::Up);
        assert_eq!(pool.replicas()[1].state(), NodeState::Blacklisted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooled_down_replica_rejoins_while_others_up() {
        let (pool, _) = build_pool(&[1, 1]);
        pool.on_result(&pool.replicas()[0], Outcome::ConnectionFailed);

        // Still cooling down: not probed, not listed
        let candidates = pool.candidates(&Target::Replica { preferred: None }).await;
        assert_eq!(ids(&candidates), vec!["replica-2"]);
        assert_eq!(pool.replicas()[0].state(), NodeState::Blacklisted);

        tokio::time::advance(Duration::from_secs(31)).await;
        let candidates = pool.candidates(&Target::Replica { preferred: None }).await;
        let mut found = ids(&candidates);
        found.sort();
        assert_eq!(found, vec!["replica-1", "replica-2"]);
        assert_eq!(pool.replicas()[0].state(), NodeState::Up);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_probe_waits_another_cooldown() {
        let (pool, transports) = build_pool(&[1, 1]);
        pool.on_result(&pool.replicas()[0], Outcome::ConnectionFailed);
        transports[1].up.store(false, Ordering::SeqCst);

        tokio::time::advance(Duration::from_secs(31)).await;
        let candidates = pool.candidates(&Target::Replica { preferred: None }).await;
        assert_eq!(ids(&candidates), vec!["replica-2"]);
        assert!(!pool.replicas()[0].cooldown_elapsed());
    }

    #[tokio::test]
    async fn test_weighted_selection_follows_weights() {
        let (pool, _) = build_pool(&[9, 1]);
        let mut first = HashMap::new();

        for _ in 0..2000 {
            let candidates = pool.candidates(&Target::Replica { preferred: None }).await;
            *first.entry(candidates[0].id().to_string()).or_insert(0) += 1;
        }

        let heavy = first.get("replica-1").copied().unwrap_or(0);
        let light = first.get("replica-2").copied().unwrap_or(0);
        assert_eq!(heavy + light, 2000);
        // Expected 90/10; leave a wide margin
        assert!(heavy > 1600, "heavy replica chosen first only {} times", heavy);
        assert!(light > 50, "light replica chosen first only {} times", light);
    }

    #[tokio::test]
    async fn test_verify_reports_without_failing() {
        let (pool, transports) = build_pool(&[1, 1]);
        transports[1].up.store(false, Ordering::SeqCst);

        let report = pool.verify().await;
        assert!(!report.all_healthy());
        assert!(pool.has_available_node());
        assert_eq!(pool.replicas()[0].state(), NodeState::Blacklisted);
        assert!(matches!(
            report.status_of("replica-1"),
            Some(HealthStatus::Unhealthy { .. })
        ));
        assert_eq!(report.status_of("primary"), Some(&HealthStatus::Healthy));
    }

    #[test]
    fn test_health_report_does_not_probe() {
        let (pool, transports) = build_pool(&[1, 1]);
        pool.on_result(&pool.replicas()[1], Outcome::ConnectionFailed);
        // A down transport is invisible until a call or probe hits it
        transports[1].up.store(false, Ordering::SeqCst);

        let report = pool.health_report();
        assert_eq!(report.healthy_count(), 2);
        assert_eq!(report.status_of("replica-1"), Some(&HealthStatus::Healthy));
        assert!(matches!(
            report.status_of("replica-2"),
            Some(HealthStatus::Blacklisted { .. })
        ));
    }

    #[test]
    fn test_from_config_uses_factory() {
        let mut config = Config::default();
        config.nodes.push(
            NodeConfig::new(NodeRole::Replica, "postgres://127.0.0.1:5434/app").with_weight(4),
        );

        let factory = |_: &NodeConfig| -> Result<Arc<dyn Transport>, TransportError> {
            Ok(SwitchTransport::new(true) as Arc<dyn Transport>)
        };
        let pool = ConnectionPool::from_config(&config, &factory).unwrap();

        assert_eq!(pool.primary().id(), "primary");
        assert_eq!(ids(pool.replicas()), vec!["replica-1", "replica-2"]);
        assert_eq!(pool.node("replica-2").map(|n| n.weight()), Some(4));
    }

    #[test]
    fn test_from_config_reports_factory_errors() {
        let config = Config::default();
        let factory = |node: &NodeConfig| -> Result<Arc<dyn Transport>, TransportError> {
            Err(TransportError::connectivity(format!("cannot reach {}", node.url)))
        };
        assert!(ConnectionPool::from_config(&config, &factory).is_err());
    }
}
