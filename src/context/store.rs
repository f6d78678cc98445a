/// Key/value stores that hold sticky context records
use async_trait::async_trait;
use fnv::FnvHashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use super::remote::RemoteStore;
use super::ContextStoreError;
use crate::config::StoreConfig;

/// Entries kept before a write also sweeps expired ones
const SWEEP_THRESHOLD: usize = 1024;

/// TTL key/value store shared by every process routing for the same application
#[async_trait]
pub trait ContextStore: Send + Sync {
    async fn read(&self, key: &str) -> Result<Option<String>, ContextStoreError>;

    /// Overwrite `key`, expiring it after `ttl`
    async fn write(&self, key: &str, value: &str, ttl: Duration) -> Result<(), ContextStoreError>;

    fn name(&self) -> &'static str;
}

/// Build the store named by configuration
pub fn build_store(config: &StoreConfig) -> Arc<dyn ContextStore> {
    match config {
        StoreConfig::Memory => Arc::new(MemoryStore::new()),
        StoreConfig::Noop => Arc::new(NoopStore),
        StoreConfig::Remote { addr, timeout_ms } => Arc::new(RemoteStore::new(
            addr.clone(),
            Duration::from_millis(*timeout_ms),
        )),
    }
}

/// In-process store; stickiness does not cross process boundaries
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<FnvHashMap<String, (String, Instant)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop expired entries, returning how many were removed
    pub async fn purge_expired(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        let now = Instant::now();
        entries.retain(|_, (_, expires)| *expires > now);
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl ContextStore for MemoryStore {
    async fn read(&self, key: &str) -> Result<Option<String>, ContextStoreError> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|(_, expires)| *expires > Instant::now())
            .map(|(value, _)| value.clone()))
    }

    async fn write(&self, key: &str, value: &str, ttl: Duration) -> Result<(), ContextStoreError> {
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        if entries.len() >= SWEEP_THRESHOLD {
            entries.retain(|_, (_, expires)| *expires > now);
        }
        entries.insert(key.to_string(), (value.to_string(), now + ttl));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Store that forgets everything; disables stickiness without special cases
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStore;

#[async_trait]
impl ContextStore for NoopStore {
    async fn read(&self, _key: &str) -> Result<Option<String>, ContextStoreError> {
        Ok(None)
    }

    async fn write(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), ContextStoreError> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}
