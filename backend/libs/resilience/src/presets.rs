/// Preset deadlines and retry policies for the feed pipeline's dependencies
///
/// Service configuration starts from these and lets the environment override the
/// deadlines. Breaker thresholds are configured per service.
use crate::retry::RetryConfig;
use std::time::Duration;

/// Deadline and retry policy for one dependency
#[derive(Debug, Clone)]
pub struct DependencyConfig {
    pub timeout: Duration,
    pub retry: RetryConfig,
}

/// Content index (search cluster)
///
/// - Timeout: 3s
/// - Retry: one quick retry, the fallback path covers the rest
pub fn content_index_config() -> DependencyConfig {
    DependencyConfig {
        timeout: Duration::from_secs(3),
        retry: RetryConfig::default(),
    }
}

/// Content store (primary database), fallback source
///
/// - Timeout: 5s
/// - No retry: a failed fallback read surfaces as an empty feed
pub fn content_store_config() -> DependencyConfig {
    DependencyConfig {
        timeout: Duration::from_secs(5),
        retry: RetryConfig::none(),
    }
}

/// Shared cache (Redis)
///
/// - Timeout: 1s, misses are cheaper than waiting
pub fn shared_cache_config() -> DependencyConfig {
    DependencyConfig {
        timeout: Duration::from_secs(1),
        retry: RetryConfig::none(),
    }
}

/// Analytics feature store
///
/// - Timeout: 2s, scoring falls back to default features
pub fn feature_store_config() -> DependencyConfig {
    DependencyConfig {
        timeout: Duration::from_secs(2),
        retry: RetryConfig::none(),
    }
}
