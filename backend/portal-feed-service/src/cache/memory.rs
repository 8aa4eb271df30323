use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{CacheError, SharedCache};

/// Process-local cache for tests and single-instance development.
///
/// Expired entries are dropped lazily on read.
#[derive(Clone, Default)]
pub struct MemoryCache {
    entries: Arc<DashMap<String, (Vec<u8>, Instant)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .map_or(false, |entry| entry.1 > Instant::now())
    }

    /// Remaining lifetime of a key, if present
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        self.entries
            .get(key)
            .and_then(|entry| entry.1.checked_duration_since(Instant::now()))
    }

    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl SharedCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let expired = match self.entries.get(key) {
            Some(entry) if entry.1 > Instant::now() => return Ok(Some(entry.0.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        if ttl.is_zero() {
            return Ok(());
        }
        self.entries
            .insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_entries_expire() {
        let cache = MemoryCache::new();
        cache
            .set("a", b"1".to_vec(), Duration::from_millis(20))
            .await
            .unwrap();
        assert_eq!(cache.get("a").await.unwrap(), Some(b"1".to_vec()));

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.get("a").await.unwrap(), None);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_zero_ttl_is_not_written() {
        let cache = MemoryCache::new();
        cache.set("a", b"1".to_vec(), Duration::ZERO).await.unwrap();
        assert!(!cache.contains_key("a"));
    }
}
