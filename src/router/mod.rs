/// Statement routing: classify, resolve stickiness, pick candidates, fail over
///
/// One `Router` is shared by every caller of an application. A call walks
/// `Classify -> ResolveForce -> SelectCandidates -> Execute` and ends in a
/// result, a statement error surfaced as-is, or `AllNodesDown` once every
/// candidate failed on connectivity.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::classify::{StatementClassification, StatementClassifier};
use crate::config::Config;
use crate::context::{build_store, StickyContext, StickyLookup};
use crate::core::{
    ConnectionPool, Node, NodeRole, Outcome, QueryResult, SqlValue, Target, TransportError,
    TransportFactory,
};
use crate::error::{NodeFailure, RamalError, RamalResult};
use crate::health::HealthReport;
use crate::tracer::{NoopTracer, TraceEvent, Tracer};

/// Read/write-splitting router over one connection pool
pub struct Router {
    pool: Arc<ConnectionPool>,
    classifier: StatementClassifier,
    context: Option<StickyContext>,
    tracer: Arc<dyn Tracer>,
    /// Operator override pinning all traffic to the primary
    forced: AtomicBool,
    /// Last call (or verification) found no usable node
    stuck: AtomicBool,
}

impl Router {
    /// `context: None` disables stickiness entirely
    pub fn new(pool: Arc<ConnectionPool>, context: Option<StickyContext>) -> Self {
        Self {
            pool,
            classifier: StatementClassifier::new(),
            context,
            tracer: Arc::new(NoopTracer),
            forced: AtomicBool::new(false),
            stuck: AtomicBool::new(false),
        }
    }

    /// Build the pool and the sticky context described by configuration
    pub fn from_config(config: &Config, factory: &dyn TransportFactory) -> RamalResult<Self> {
        let pool = ConnectionPool::from_config(config, factory)?;

        let context = if config.sticky.enabled {
            let store = build_store(&config.sticky.store);
            Some(
                StickyContext::new(store, config.sticky.window())
                    .with_key_prefix(config.sticky.key_prefix.clone()),
            )
        } else {
            None
        };

        info!(
            "Router ready: primary {}, {} replica(s), sticky context {}",
            pool.primary().id(),
            pool.replicas().len(),
            context
                .as_ref()
                .map(|c| c.store_name())
                .unwrap_or("disabled")
        );

        Ok(Self::new(Arc::new(pool), context))
    }

    /// Route trace events to `tracer`, including sticky context events
    pub fn with_tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.context = self.context.take().map(|c| c.with_tracer(Arc::clone(&tracer)));
        self.tracer = tracer;
        self
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Run one statement
    ///
    /// `context_id` groups calls that must read their own writes; without it
    /// only the statement itself and the operator override decide the target.
    ///
    /// Only statements that force the primary by themselves (writes, nested
    /// writes, unknown statements) open or extend a context's sticky window.
    /// Reads sent to the primary because the context was already pinned, or
    /// because of [`Router::force_master`], leave the window as it is.
    pub async fn execute(
        &self,
        sql: &str,
        params: &[SqlValue],
        context_id: Option<&str>,
    ) -> RamalResult<QueryResult> {
        let classification = self.classifier.classify(sql);
        let by_proxy = self.is_forced();

        let lookup = if classification.forces_master || by_proxy {
            StickyLookup::default()
        } else {
            self.lookup_context(context_id).await
        };
        let force = classification.forces_master || lookup.force_master || by_proxy;

        let target = if force {
            self.tracer.fire(&TraceEvent::StickToMaster {
                context_id,
                by_statement: classification.forces_master,
                by_context: lookup.force_master,
                by_proxy,
            });
            Target::Primary
        } else {
            Target::Replica {
                preferred: lookup.preferred_replica,
            }
        };

        let candidates = self.pool.candidates(&target).await;
        self.tracer.fire(&TraceEvent::AppropriatePool {
            role: if force { NodeRole::Primary } else { NodeRole::Replica },
            candidates: candidates.len(),
        });
        debug!(
            "{} statement ({}) forced={} candidates={:?}",
            classification.role,
            classification.reason,
            force,
            candidates.iter().map(|n| n.id()).collect::<Vec<_>>()
        );

        let mut failures = Vec::new();
        let mut served = self.try_candidates(&candidates, sql, params, &mut failures).await?;

        // A read nobody could serve is retried once on the primary
        if served.is_none() && !force && candidates.iter().all(|n| n.role() == NodeRole::Replica) {
            warn!("All replicas failed, escalating read to primary");
            let primary = self.pool.candidates(&Target::Primary).await;
            served = self.try_candidates(&primary, sql, params, &mut failures).await?;
        }

        match served {
            Some((node, result)) => {
                self.stuck.store(false, Ordering::SeqCst);
                if let Some(id) = context_id {
                    self.update_context(id, &classification, force, &node).await;
                }
                Ok(result)
            }
            None => {
                self.stuck.store(true, Ordering::SeqCst);
                let error = RamalError::all_nodes_down(failures);
                error!("{}", error);
                Err(error)
            }
        }
    }

    /// Alias of [`Router::execute`] for read-style callers
    pub async fn query(
        &self,
        sql: &str,
        params: &[SqlValue],
        context_id: Option<&str>,
    ) -> RamalResult<QueryResult> {
        self.execute(sql, params, context_id).await
    }

    /// Walk candidates in order until one answers
    ///
    /// Connectivity failures are recorded and skipped. A statement error stops
    /// the walk: running it elsewhere could repeat side effects.
    async fn try_candidates(
        &self,
        candidates: &[Arc<Node>],
        sql: &str,
        params: &[SqlValue],
        failures: &mut Vec<NodeFailure>,
    ) -> RamalResult<Option<(Arc<Node>, QueryResult)>> {
        for node in candidates {
            match node.execute(sql, params).await {
                Ok(result) => {
                    self.pool.on_result(node, Outcome::Succeeded);
                    return Ok(Some((Arc::clone(node), result)));
                }
                Err(TransportError::Statement(message)) => {
                    self.stuck.store(false, Ordering::SeqCst);
                    return Err(RamalError::statement(node.id(), message));
                }
                Err(TransportError::Connectivity(message)) => {
                    self.pool.on_result(node, Outcome::ConnectionFailed);
                    warn!("{} {} failed: {}", node.role(), node.id(), message);
                    self.tracer.fire(&TraceEvent::Failover {
                        node: node.id(),
                        error: &message,
                    });
                    failures.push(NodeFailure {
                        node: node.id().to_string(),
                        message,
                    });
                }
            }
        }
        Ok(None)
    }

    /// Context lookups fail open: an unreachable store means no stickiness
    async fn lookup_context(&self, context_id: Option<&str>) -> StickyLookup {
        let (Some(context), Some(id)) = (&self.context, context_id) else {
            return StickyLookup::default();
        };

        match context.lookup(id).await {
            Ok(lookup) => lookup,
            Err(e) => {
                warn!("Sticky context lookup for {} failed, routing without it: {}", id, e);
                StickyLookup::default()
            }
        }
    }

    async fn update_context(
        &self,
        context_id: &str,
        classification: &StatementClassification,
        forced: bool,
        node: &Node,
    ) {
        let Some(context) = &self.context else {
            return;
        };

        let result = if classification.forces_master {
            context.record_write(context_id).await
        } else if !forced {
            context.record_read_from(context_id, node.role(), node.id()).await
        } else {
            // Forced by context or operator; the window is not extended
            return;
        };

        if let Err(e) = result {
            warn!("Sticky context update for {} failed: {}", context_id, e);
        }
    }

    /// Pin every statement to the primary until [`Router::unforce_master`]
    pub fn force_master(&self) {
        if !self.forced.swap(true, Ordering::SeqCst) {
            info!("All traffic forced to primary");
        }
    }

    pub fn unforce_master(&self) {
        if self.forced.swap(false, Ordering::SeqCst) {
            info!("Primary override lifted, reads go to replicas again");
        }
    }

    pub fn is_forced(&self) -> bool {
        self.forced.load(Ordering::SeqCst)
    }

    /// Whether the last call found no node able to serve it
    pub fn is_stuck(&self) -> bool {
        self.stuck.load(Ordering::SeqCst)
    }

    /// Probe every node; true when all of them are healthy
    ///
    /// Never fails. A replica that is down only makes this return false, the
    /// router is stuck only when no node is Up afterwards.
    pub async fn verify(&self) -> bool {
        let report = self.pool.verify().await;
        self.stuck
            .store(!self.pool.has_available_node(), Ordering::SeqCst);

        if !report.all_healthy() {
            warn!(
                "Verification found {}/{} healthy node(s):\n{}",
                report.healthy_count(),
                report.nodes.len(),
                report
            );
        }
        report.all_healthy()
    }

    /// Node health as currently known, without probing
    pub fn health_report(&self) -> HealthReport {
        self.pool.health_report()
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("pool", &self.pool)
            .field("context", &self.context)
            .field("forced", &self.is_forced())
            .field("stuck", &self.is_stuck())
            .finish()
    }
}
