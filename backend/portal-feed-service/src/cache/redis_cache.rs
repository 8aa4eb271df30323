use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::time::Duration;
use tracing::{debug, warn};

use resilience::with_timeout;

use super::{CacheError, SharedCache};

/// Redis-backed shared cache
///
/// `ConnectionManager` reconnects on its own; every command is bounded by `timeout`.
#[derive(Clone)]
pub struct RedisCache {
    manager: ConnectionManager,
    timeout: Duration,
}

impl RedisCache {
    pub async fn connect(redis_url: &str, timeout: Duration) -> Result<Self, CacheError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| CacheError::Unavailable(format!("Failed to create Redis client: {}", e)))?;

        let manager = ConnectionManager::new(client).await.map_err(|e| {
            CacheError::Unavailable(format!("Failed to create Redis connection: {}", e))
        })?;

        Ok(Self { manager, timeout })
    }

    pub fn from_manager(manager: ConnectionManager, timeout: Duration) -> Self {
        Self { manager, timeout }
    }

    pub async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.manager.clone();
        self.run("PING", async move {
            redis::cmd("PING").query_async::<_, String>(&mut conn).await
        })
        .await
        .map(|_| ())
    }

    async fn run<T>(
        &self,
        op: &'static str,
        fut: impl std::future::Future<Output = redis::RedisResult<T>>,
    ) -> Result<T, CacheError> {
        match with_timeout(op, self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                warn!("Redis {} failed: {}", op, e);
                Err(CacheError::Unavailable(e.to_string()))
            }
            Err(_) => {
                warn!("Redis {} timed out after {:?}", op, self.timeout);
                Err(CacheError::Timeout(self.timeout))
            }
        }
    }
}

#[async_trait]
impl SharedCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self.manager.clone();
        let value = self
            .run("GET", async move {
                redis::cmd("GET")
                    .arg(key)
                    .query_async::<_, Option<Vec<u8>>>(&mut conn)
                    .await
            })
            .await?;

        debug!(key, hit = value.is_some(), "Redis GET");
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let ttl_ms = ttl.as_millis() as u64;
        if ttl_ms == 0 {
            return Ok(());
        }

        let mut conn = self.manager.clone();
        self.run("SET", async move {
            redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("PX")
                .arg(ttl_ms)
                .query_async::<_, ()>(&mut conn)
                .await
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.manager.clone();
        self.run("DEL", async move {
            redis::cmd("DEL").arg(key).query_async::<_, ()>(&mut conn).await
        })
        .await
    }
}
