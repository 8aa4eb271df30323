use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::time::Duration;
use tracing::{debug, warn};

use resilience::with_timeout;

use super::{FeatureError, FeatureStore};
use crate::models::{EngagementFeatures, FeatureMap};

/// Analytics feature store backed by the analytics Redis
///
/// Keys:
/// - `feat:{site}:ctr_1h:{id}` → float
/// - `feat:{site}:trending_channels` → sorted set of channel slugs by weight
#[derive(Clone)]
pub struct RedisFeatureStore {
    manager: ConnectionManager,
    timeout: Duration,
}

impl RedisFeatureStore {
    pub async fn connect(redis_url: &str, timeout: Duration) -> Result<Self, FeatureError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| FeatureError::Unavailable(format!("Failed to create Redis client: {}", e)))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| FeatureError::Unavailable(format!("Failed to connect: {}", e)))?;
        Ok(Self { manager, timeout })
    }

    async fn run<T>(
        &self,
        op: &'static str,
        fut: impl std::future::Future<Output = redis::RedisResult<T>>,
    ) -> Result<T, FeatureError> {
        match with_timeout(op, self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                warn!("Feature store {} failed: {}", op, e);
                Err(FeatureError::Unavailable(e.to_string()))
            }
            Err(_) => Err(FeatureError::Timeout(self.timeout)),
        }
    }
}

fn ctr_key(site: &str, id: &str) -> String {
    format!("feat:{}:ctr_1h:{}", site, id)
}

#[async_trait]
impl FeatureStore for RedisFeatureStore {
    async fn lookup(&self, site: &str, ids: &[String]) -> Result<FeatureMap, FeatureError> {
        if ids.is_empty() {
            return Ok(FeatureMap::new());
        }

        let keys: Vec<String> = ids.iter().map(|id| ctr_key(site, id)).collect();
        let mut conn = self.manager.clone();
        let values: Vec<Option<f64>> = self
            .run("MGET", async move {
                redis::cmd("MGET")
                    .arg(&keys)
                    .query_async::<_, Vec<Option<f64>>>(&mut conn)
                    .await
            })
            .await?;

        let features: FeatureMap = ids
            .iter()
            .zip(values)
            .filter_map(|(id, ctr)| {
                ctr.filter(|v| v.is_finite()).map(|v| {
                    (
                        id.clone(),
                        EngagementFeatures {
                            ctr_1h: Some(v.clamp(0.0, 1.0)),
                        },
                    )
                })
            })
            .collect();

        debug!(site, requested = ids.len(), found = features.len(), "Feature lookup");
        Ok(features)
    }

    async fn trending_channels(
        &self,
        site: &str,
        limit: usize,
    ) -> Result<Vec<(String, f64)>, FeatureError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let key = format!("feat:{}:trending_channels", site);
        let stop = limit as isize - 1;
        let mut conn = self.manager.clone();
        self.run("ZREVRANGE", async move {
            redis::cmd("ZREVRANGE")
                .arg(&key)
                .arg(0)
                .arg(stop)
                .arg("WITHSCORES")
                .query_async::<_, Vec<(String, f64)>>(&mut conn)
                .await
        })
        .await
    }
}

/// Used when no analytics store is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledFeatureStore;

#[async_trait]
impl FeatureStore for DisabledFeatureStore {
    async fn lookup(&self, _site: &str, _ids: &[String]) -> Result<FeatureMap, FeatureError> {
        Err(FeatureError::Unavailable("feature store not configured".into()))
    }

    async fn trending_channels(
        &self,
        _site: &str,
        _limit: usize,
    ) -> Result<Vec<(String, f64)>, FeatureError> {
        Ok(Vec::new())
    }
}
