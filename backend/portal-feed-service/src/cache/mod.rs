//! Shared cache seam
//!
//! One key/value contract with per-key TTL backs every piece of cross-request state:
//! - `v1:feed:*` → serialized responses (TTL from the cache strategy engine)
//! - `v1:agg:*` → precomputed headline/hot rankings
//! - `v1:seen:{site}:{session}` → seen set
//! - `v1:profile:*`, `v1:history:*`, `v1:activity:*`, `v1:channels:*` → anonymous profiler state
//! - `v1:breaker:{name}` → circuit breaker state (through [`CacheBreakerStore`])
//!
//! Failures here are always survivable: callers log and treat them as a miss.

mod memory;
mod redis_cache;

pub use self::memory::MemoryCache;
pub use self::redis_cache::RedisCache;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),

    #[error("cache operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("cache payload invalid: {0}")]
    Serialization(String),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SharedCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Store `value` for `ttl`; implementations must reject a zero TTL as a no-op.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

/// Read and decode a JSON value. A payload that no longer decodes is reported as
/// `Serialization` so callers can treat it as a miss.
pub async fn get_json<T: DeserializeOwned>(
    cache: &dyn SharedCache,
    key: &str,
) -> Result<Option<T>, CacheError> {
    match cache.get(key).await? {
        Some(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| CacheError::Serialization(format!("{}: {}", key, e))),
        None => Ok(None),
    }
}

/// Encode and store a JSON value. Zero TTL skips the write entirely.
pub async fn set_json<T: Serialize + ?Sized>(
    cache: &dyn SharedCache,
    key: &str,
    value: &T,
    ttl: Duration,
) -> Result<(), CacheError> {
    if ttl.is_zero() {
        return Ok(());
    }
    let bytes = serde_json::to_vec(value).map_err(|e| CacheError::Serialization(e.to_string()))?;
    cache.set(key, bytes, ttl).await
}

/// Cache key builders for non-response state
pub mod keys {
    pub fn seen(site: &str, session: &str) -> String {
        format!("v1:seen:{}:{}", site, session)
    }

    pub fn profile(fingerprint: &str, site: &str) -> String {
        format!("v1:profile:{}:{}", site, fingerprint)
    }

    pub fn device_history(fingerprint: &str, site: &str) -> String {
        format!("v1:history:{}:{}", site, fingerprint)
    }

    pub fn session_activity(session: &str, site: &str) -> String {
        format!("v1:activity:{}:{}", site, session)
    }

    pub fn channels(site: &str) -> String {
        format!("v1:channels:{}", site)
    }
}

/// Persists circuit breaker state in the shared cache so every instance agrees.
pub struct CacheBreakerStore {
    cache: Arc<dyn SharedCache>,
}

impl CacheBreakerStore {
    pub fn new(cache: Arc<dyn SharedCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl resilience::BreakerStore for CacheBreakerStore {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, resilience::StoreError> {
        self.cache
            .get(key)
            .await
            .map_err(|e| resilience::StoreError::Unavailable(e.to_string()))
    }

    async fn save(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<(), resilience::StoreError> {
        let result = if ttl.is_zero() {
            self.cache.delete(key).await
        } else {
            self.cache.set(key, value, ttl).await
        };
        result.map_err(|e| {
            warn!(key, error = %e, "Failed to persist breaker state");
            resilience::StoreError::Unavailable(e.to_string())
        })
    }
}
