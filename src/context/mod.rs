/// Sticky context: read-your-writes across processes
///
/// A context id (session, user, request chain) that wrote recently, or that
/// had to read from the primary, is pinned to the primary for a short window.
/// State lives in a shared `ContextStore` so every process routing for the
/// same application sees the same window.

pub mod remote;
pub mod resp;
pub mod store;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::core::NodeRole;
use crate::tracer::{NoopTracer, TraceEvent, Tracer};
use crate::utils::{context_key, now_millis};

pub use remote::RemoteStore;
pub use store::{build_store, ContextStore, MemoryStore, NoopStore};

/// Context store errors
#[derive(Debug, Error)]
pub enum ContextStoreError {
    #[error("Context store unavailable: {0}")]
    Unavailable(String),

    #[error("Context store {operation} timed out")]
    Timeout { operation: String },

    #[error("Context store protocol error: {0}")]
    Protocol(String),

    #[error("Invalid sticky record: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for ContextStoreError {
    fn from(err: serde_json::Error) -> Self {
        ContextStoreError::Serialization(err.to_string())
    }
}

/// Stored form of one context's routing state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StickyRecord {
    pub context_id: String,
    /// Epoch millis until which every statement goes to the primary
    #[serde(default)]
    pub forced_master_until: Option<u64>,
    #[serde(default)]
    pub last_role_used: Option<NodeRole>,
    #[serde(default)]
    pub last_replica_id: Option<String>,
    pub expires_at: u64,
}

impl StickyRecord {
    pub fn forces_master_at(&self, now_ms: u64) -> bool {
        self.forced_master_until.map_or(false, |until| until > now_ms)
    }

    pub fn is_live_at(&self, now_ms: u64) -> bool {
        self.expires_at > now_ms
    }
}

/// What a context asks of the next statement
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StickyLookup {
    pub force_master: bool,
    pub preferred_replica: Option<String>,
}

/// Reads and writes sticky records for context ids
#[derive(Clone)]
pub struct StickyContext {
    store: Arc<dyn ContextStore>,
    window: Duration,
    key_prefix: String,
    tracer: Arc<dyn Tracer>,
}

impl StickyContext {
    pub fn new(store: Arc<dyn ContextStore>, window: Duration) -> Self {
        Self {
            store,
            window,
            key_prefix: "ramal:ctx".to_string(),
            tracer: Arc::new(NoopTracer),
        }
    }

    pub fn with_key_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.tracer = tracer;
        self
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn store_name(&self) -> &'static str {
        self.store.name()
    }

    fn key(&self, context_id: &str) -> String {
        context_key(&self.key_prefix, context_id)
    }

    /// Fetch the live record for a context, if any
    pub async fn load(&self, context_id: &str) -> Result<Option<StickyRecord>, ContextStoreError> {
        let Some(raw) = self.store.read(&self.key(context_id)).await? else {
            return Ok(None);
        };
        let record: StickyRecord = serde_json::from_str(&raw)?;

        // Keys are digests; a record for another id under the same key is a miss
        if record.context_id != context_id || !record.is_live_at(now_millis()) {
            return Ok(None);
        }
        Ok(Some(record))
    }

    /// Force flag and preferred replica in one store round trip
    pub async fn lookup(&self, context_id: &str) -> Result<StickyLookup, ContextStoreError> {
        let now = now_millis();
        let lookup = match self.load(context_id).await? {
            Some(record) => StickyLookup {
                force_master: record.forces_master_at(now),
                preferred_replica: match record.last_role_used {
                    Some(NodeRole::Replica) => record.last_replica_id,
                    _ => None,
                },
            },
            None => StickyLookup::default(),
        };

        self.tracer.fire(&TraceEvent::ContextRead {
            context_id,
            force_master: lookup.force_master,
            preferred_replica: lookup.preferred_replica.as_deref(),
        });
        Ok(lookup)
    }

    pub async fn should_force_master(&self, context_id: &str) -> Result<bool, ContextStoreError> {
        Ok(self.lookup(context_id).await?.force_master)
    }

    pub async fn preferred_replica(&self, context_id: &str) -> Result<Option<String>, ContextStoreError> {
        Ok(self.lookup(context_id).await?.preferred_replica)
    }

    /// A write reached the primary: pin the context for one window
    pub async fn record_write(&self, context_id: &str) -> Result<(), ContextStoreError> {
        let now = now_millis();
        let record = StickyRecord {
            context_id: context_id.to_string(),
            forced_master_until: Some(now + self.window_millis()),
            last_role_used: Some(NodeRole::Primary),
            last_replica_id: None,
            expires_at: now + self.window_millis(),
        };
        self.save(&record).await
    }

    /// An unforced read was served by `node_id`
    ///
    /// A read that landed on the primary means no replica could serve it, so
    /// replicas may be lagging: the context is pinned like after a write. A
    /// replica read remembers the replica so later reads go back to it.
    pub async fn record_read_from(
        &self,
        context_id: &str,
        role: NodeRole,
        node_id: &str,
    ) -> Result<(), ContextStoreError> {
        match role {
            NodeRole::Primary => self.record_write(context_id).await,
            NodeRole::Replica => {
                let record = StickyRecord {
                    context_id: context_id.to_string(),
                    forced_master_until: None,
                    last_role_used: Some(NodeRole::Replica),
                    last_replica_id: Some(node_id.to_string()),
                    expires_at: now_millis() + self.window_millis(),
                };
                self.save(&record).await
            }
        }
    }

    async fn save(&self, record: &StickyRecord) -> Result<(), ContextStoreError> {
        let value = serde_json::to_string(record)?;
        self.store
            .write(&self.key(&record.context_id), &value, self.window)
            .await?;

        debug!(
            "Stored sticky record for {} via {} store (forced until {:?})",
            record.context_id,
            self.store.name(),
            record.forced_master_until
        );
        self.tracer.fire(&TraceEvent::ContextWrite {
            context_id: &record.context_id,
            forced_until: record.forced_master_until,
            last_role: record.last_role_used.unwrap_or(NodeRole::Primary),
        });
        Ok(())
    }

    fn window_millis(&self) -> u64 {
        self.window.as_millis() as u64
    }
}

impl std::fmt::Debug for StickyContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StickyContext")
            .field("store", &self.store.name())
            .field("window", &self.window)
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracer::testing::RecordingTracer;
    use async_trait::async_trait;

    fn memory_context(window: Duration) -> StickyContext {
        StickyContext::new(Arc::new(MemoryStore::new()), window)
    }

    struct BrokenStore;

    #[async_trait]
    impl ContextStore for BrokenStore {
        async fn read(&self, _key: &str) -> Result<Option<String>, ContextStoreError> {
            Err(ContextStoreError::Unavailable("connection refused".to_string()))
        }

        async fn write(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), ContextStoreError> {
            Err(ContextStoreError::Unavailable("connection refused".to_string()))
        }

        fn name(&self) -> &'static str {
            "broken"
        }
    }

    #[tokio::test]
    async fn test_unknown_context_is_not_forced() {
        let context = memory_context(Duration::from_secs(5));
        assert!(!context.should_force_master("fresh").await.unwrap());
        assert_eq!(context.preferred_replica("fresh").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_forces_master_for_window() {
        let context = memory_context(Duration::from_secs(5));
        context.record_write("user-1").await.unwrap();

        assert!(context.should_force_master("user-1").await.unwrap());
        assert!(!context.should_force_master("user-2").await.unwrap());

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(!context.should_force_master("user-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_primary_read_forces_master() {
        let context = memory_context(Duration::from_secs(5));
        context
            .record_read_from("user-1", NodeRole::Primary, "primary")
            .await
            .unwrap();
        assert!(context.should_force_master("user-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_replica_read_remembers_replica() {
        let context = memory_context(Duration::from_secs(5));
        context
            .record_read_from("user-1", NodeRole::Replica, "replica-2")
            .await
            .unwrap();

        let lookup = context.lookup("user-1").await.unwrap();
        assert!(!lookup.force_master);
        assert_eq!(lookup.preferred_replica.as_deref(), Some("replica-2"));

        // A later write replaces the replica preference
        context.record_write("user-1").await.unwrap();
        let lookup = context.lookup("user-1").await.unwrap();
        assert!(lookup.force_master);
        assert_eq!(lookup.preferred_replica, None);
    }

    #[tokio::test]
    async fn test_record_is_json_under_digest_key() {
        let store = Arc::new(MemoryStore::new());
        let context = StickyContext::new(store.clone(), Duration::from_secs(5)).with_key_prefix("app");
        context.record_write("user-1").await.unwrap();

        let raw = store
            .read(&context_key("app", "user-1"))
            .await
            .unwrap()
            .expect("record stored");
        let record: StickyRecord = serde_json::from_str(&raw).unwrap();
        assert_eq!(record.context_id, "user-1");
        assert_eq!(record.last_role_used, Some(NodeRole::Primary));
        assert!(record.forces_master_at(now_millis()));
    }

    #[tokio::test]
    async fn test_expired_record_is_ignored() {
        let store = Arc::new(MemoryStore::new());
        let context = StickyContext::new(store.clone(), Duration::from_secs(5));
        let stale = StickyRecord {
            context_id: "user-1".to_string(),
            forced_master_until: Some(1),
            last_role_used: Some(NodeRole::Primary),
            last_replica_id: None,
            expires_at: 1,
        };
        store
            .write(
                &context_key("ramal:ctx", "user-1"),
                &serde_json::to_string(&stale).unwrap(),
                Duration::from_secs(60),
            )
            .await
            .unwrap();

        assert_eq!(context.load("user-1").await.unwrap(), None);
        assert!(!context.should_force_master("user-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_garbage_record_is_an_error() {
        let store = Arc::new(MemoryStore::new());
        let context = StickyContext::new(store.clone(), Duration::from_secs(5));
        store
            .write(&context_key("ramal:ctx", "user-1"), "not json", Duration::from_secs(5))
            .await
            .unwrap();

        let err = context.should_force_master("user-1").await.unwrap_err();
        assert!(matches!(err, ContextStoreError::Serialization(_)));
    }

    #[tokio::test]
    async fn test_store_errors_propagate() {
        let context = StickyContext::new(Arc::new(BrokenStore), Duration::from_secs(5));
        assert!(matches!(
            context.should_force_master("user-1").await,
            Err(ContextStoreError::Unavailable(_))
        ));
        assert!(context.record_write("user-1").await.is_err());
    }

    #[tokio::test]
    async fn test_noop_store_never_sticks() {
        let context = StickyContext::new(Arc::new(NoopStore), Duration::from_secs(5));
        context.record_write("user-1").await.unwrap();
        assert!(!context.should_force_master("user-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_tracer_sees_reads_and_writes() {
        let tracer = Arc::new(RecordingTracer::default());
        let context = memory_context(Duration::from_secs(5)).with_tracer(tracer.clone());

        context.record_write("user-1").await.unwrap();
        context.should_force_master("user-1").await.unwrap();

        assert_eq!(tracer.events(), vec!["context_write", "context_read"]);
    }
}
