//! Storage seam for breaker state.
//!
//! Breakers never keep authoritative state in process memory. Each transition is
//! written to a `BreakerStore` so that concurrent handlers (and other instances
//! sharing the same backing cache) agree on whether a dependency is open.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("breaker store unavailable: {0}")]
    Unavailable(String),
    #[error("breaker state corrupted: {0}")]
    Corrupted(String),
}

/// Minimal key/value contract with per-key expiry.
#[async_trait]
pub trait BreakerStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// A zero `ttl` removes the key.
    async fn save(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError>;
}

#[async_trait]
impl<S: BreakerStore + ?Sized> BreakerStore for Arc<S> {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        (**self).load(key).await
    }

    async fn save(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError> {
        (**self).save(key, value, ttl).await
    }
}

/// Process-local store for tests and single-instance deployments.
#[derive(Clone, Default)]
pub struct MemoryBreakerStore {
    entries: Arc<Mutex<HashMap<String, (Vec<u8>, Instant)>>>,
}

impl MemoryBreakerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BreakerStore for MemoryBreakerStore {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some((_, expires_at)) if *expires_at <= Instant::now() => {
                entries.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    async fn save(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError> {
        let mut entries = self.entries.lock();
        if ttl.is_zero() {
            entries.remove(key);
        } else {
            entries.insert(key.to_string(), (value, Instant::now() + ttl));
        }
        Ok(())
    }
}
