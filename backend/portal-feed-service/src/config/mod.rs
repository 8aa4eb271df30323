use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use resilience::{presets, CircuitBreakerConfig, DependencyConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub redis: RedisConfig,
    pub database: DatabaseConfig,
    pub index: IndexConfig,
    pub feed: FeedConfig,
    pub breaker: BreakerSettings,
    pub timeouts: TimeoutSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub env: String,
    pub port: u16,
    pub log_level: String,
    pub default_site: String,
    /// Allows `?debug=true` to attach pipeline metadata to responses
    pub debug_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Unset means a process-local cache (single instance / development only)
    pub url: Option<String>,
    pub features_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    pub url: String,
    pub index_name: String,
}

/// Tunables for feed assembly
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Candidate pool = page size × oversample, clamped to [min_pool, max_pool]
    pub oversample: usize,
    pub min_pool: usize,
    pub max_pool: usize,
    pub seen_cap: usize,
    pub seen_ttl_secs: u64,
    pub profile_ttl_secs: u64,
    pub device_history_cap: usize,
    pub device_history_ttl_secs: u64,
    pub session_activity_cap: usize,
    pub session_activity_ttl_secs: u64,
    pub max_cursor_age_secs: i64,
    /// Offset of the site's local time, used for peak-hour TTL adjustment
    pub site_utc_offset_hours: i32,
    pub precompute_async: bool,
    pub aggregate_ttl_secs: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            oversample: 10,
            min_pool: 50,
            max_pool: 400,
            seen_cap: 500,
            seen_ttl_secs: 6 * 3600,
            profile_ttl_secs: 300,
            device_history_cap: 200,
            device_history_ttl_secs: 30 * 24 * 3600,
            session_activity_cap: 50,
            session_activity_ttl_secs: 1800,
            max_cursor_age_secs: 24 * 3600,
            site_utc_offset_hours: 0,
            precompute_async: true,
            aggregate_ttl_secs: 120,
        }
    }
}

impl FeedConfig {
    /// Candidate pool for one request.
    ///
    /// Independent of the cursor offset, so a pagination walk never reaches past
    /// `max_pool` clusters even when more content is available. That cap on walk
    /// depth is deliberate.
    pub fn pool_size(&self, page_size: usize) -> usize {
        page_size
            .saturating_mul(self.oversample.max(1))
            .clamp(self.min_pool, self.max_pool.max(self.min_pool))
    }

    pub fn site_offset(&self) -> FixedOffset {
        let secs = self.site_utc_offset_hours.clamp(-23, 23) * 3600;
        FixedOffset::east_opt(secs).unwrap_or_else(|| Utc.fix())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub window_secs: u64,
    pub recovery_secs: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window_secs: 60,
            recovery_secs: 30,
        }
    }
}

impl BreakerSettings {
    pub fn to_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold.max(1),
            failure_window: Duration::from_secs(self.window_secs.max(1)),
            recovery_timeout: Duration::from_secs(self.recovery_secs.max(1)),
        }
    }
}

/// Per-dependency deadlines in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutSettings {
    pub index_ms: u64,
    pub store_ms: u64,
    pub cache_ms: u64,
    pub features_ms: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        let millis = |preset: DependencyConfig| preset.timeout.as_millis() as u64;
        Self {
            index_ms: millis(presets::content_index_config()),
            store_ms: millis(presets::content_store_config()),
            cache_ms: millis(presets::shared_cache_config()),
            features_ms: millis(presets::feature_store_config()),
        }
    }
}

impl TimeoutSettings {
    pub fn index(&self) -> Duration {
        Duration::from_millis(self.index_ms)
    }

    pub fn store(&self) -> Duration {
        Duration::from_millis(self.store_ms)
    }

    pub fn cache(&self) -> Duration {
        Duration::from_millis(self.cache_ms)
    }

    pub fn features(&self) -> Duration {
        Duration::from_millis(self.features_ms)
    }
}

/// Local development defaults; no external cache, debug metadata allowed
impl Default for Config {
    fn default() -> Self {
        Self {
            app: AppConfig {
                env: "development".to_string(),
                port: 8080,
                log_level: "info".to_string(),
                default_site: "main".to_string(),
                debug_enabled: true,
            },
            redis: RedisConfig {
                url: None,
                features_url: None,
            },
            database: DatabaseConfig {
                url: "postgres://localhost/portal".to_string(),
                max_connections: 10,
            },
            index: IndexConfig {
                url: "http://localhost:9200".to_string(),
                index_name: "portal_content".to_string(),
            },
            feed: FeedConfig::default(),
            breaker: BreakerSettings::default(),
            timeouts: TimeoutSettings::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        dotenvy::dotenv().ok();

        let feed_defaults = FeedConfig::default();
        let breaker_defaults = BreakerSettings::default();
        let timeout_defaults = TimeoutSettings::default();

        Ok(Config {
            app: AppConfig {
                env: std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
                port: env_or("APP_PORT", 8080),
                log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
                default_site: std::env::var("DEFAULT_SITE").unwrap_or_else(|_| "main".to_string()),
                debug_enabled: env_or("FEED_DEBUG_ENABLED", false),
            },
            redis: RedisConfig {
                url: std::env::var("REDIS_URL").ok().filter(|v| !v.is_empty()),
                features_url: std::env::var("FEATURES_REDIS_URL")
                    .ok()
                    .filter(|v| !v.is_empty()),
            },
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")?,
                max_connections: env_or("DATABASE_MAX_CONNECTIONS", 10),
            },
            index: IndexConfig {
                url: std::env::var("CONTENT_INDEX_URL")
                    .unwrap_or_else(|_| "http://localhost:9200".to_string()),
                index_name: std::env::var("CONTENT_INDEX_NAME")
                    .unwrap_or_else(|_| "portal_content".to_string()),
            },
            feed: FeedConfig {
                oversample: env_or("FEED_OVERSAMPLE", feed_defaults.oversample).clamp(5, 40),
                min_pool: env_or("FEED_MIN_POOL", feed_defaults.min_pool),
                max_pool: env_or("FEED_MAX_POOL", feed_defaults.max_pool),
                seen_cap: env_or("FEED_SEEN_CAP", feed_defaults.seen_cap),
                seen_ttl_secs: env_or("FEED_SEEN_TTL_SECS", feed_defaults.seen_ttl_secs),
                profile_ttl_secs: env_or("FEED_PROFILE_TTL_SECS", feed_defaults.profile_ttl_secs),
                device_history_cap: env_or(
                    "FEED_DEVICE_HISTORY_CAP",
                    feed_defaults.device_history_cap,
                ),
                device_history_ttl_secs: env_or(
                    "FEED_DEVICE_HISTORY_TTL_SECS",
                    feed_defaults.device_history_ttl_secs,
                ),
                session_activity_cap: env_or(
                    "FEED_SESSION_ACTIVITY_CAP",
                    feed_defaults.session_activity_cap,
                ),
                session_activity_ttl_secs: env_or(
                    "FEED_SESSION_ACTIVITY_TTL_SECS",
                    feed_defaults.session_activity_ttl_secs,
                ),
                max_cursor_age_secs: env_or(
                    "FEED_MAX_CURSOR_AGE_SECS",
                    feed_defaults.max_cursor_age_secs,
                ),
                site_utc_offset_hours: env_or(
                    "SITE_UTC_OFFSET_HOURS",
                    feed_defaults.site_utc_offset_hours,
                ),
                precompute_async: env_or("FEED_PRECOMPUTE_ASYNC", feed_defaults.precompute_async),
                aggregate_ttl_secs: env_or(
                    "FEED_AGGREGATE_TTL_SECS",
                    feed_defaults.aggregate_ttl_secs,
                ),
            },
            breaker: BreakerSettings {
                failure_threshold: env_or(
                    "BREAKER_FAILURE_THRESHOLD",
                    breaker_defaults.failure_threshold,
                ),
                window_secs: env_or("BREAKER_WINDOW_SECS", breaker_defaults.window_secs),
                recovery_secs: env_or("BREAKER_RECOVERY_SECS", breaker_defaults.recovery_secs),
            },
            timeouts: TimeoutSettings {
                index_ms: env_or("INDEX_TIMEOUT_MS", timeout_defaults.index_ms).clamp(100, 9_000),
                store_ms: env_or("STORE_TIMEOUT_MS", timeout_defaults.store_ms).clamp(100, 9_000),
                cache_ms: env_or("CACHE_TIMEOUT_MS", timeout_defaults.cache_ms).clamp(50, 9_000),
                features_ms: env_or("FEATURES_TIMEOUT_MS", timeout_defaults.features_ms)
                    .clamp(100, 9_000),
            },
        })
    }
}

/// Read and parse an environment variable, keeping the default on absence or bad input.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(key, value = %raw, "Ignoring unparseable configuration value");
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_size_is_clamped() {
        let config = FeedConfig::default();
        assert_eq!(config.pool_size(1), 50);
        assert_eq!(config.pool_size(20), 200);
        assert_eq!(config.pool_size(100), 400);
    }

    #[test]
    fn test_default_timeouts_come_from_presets() {
        let timeouts = TimeoutSettings::default();
        assert_eq!(timeouts.index(), presets::content_index_config().timeout);
        assert_eq!(timeouts.store(), presets::content_store_config().timeout);
        assert_eq!(timeouts.cache(), presets::shared_cache_config().timeout);
        assert_eq!(timeouts.features(), presets::feature_store_config().timeout);
    }

    #[test]
    fn test_env_or_falls_back_on_garbage() {
        std::env::set_var("PORTAL_FEED_TEST_GARBAGE", "not-a-number");
        assert_eq!(env_or("PORTAL_FEED_TEST_GARBAGE", 7u32), 7);
        std::env::remove_var("PORTAL_FEED_TEST_GARBAGE");
        assert_eq!(env_or("PORTAL_FEED_TEST_MISSING", 3u32), 3);
    }

    #[test]
    fn test_site_offset() {
        let config = FeedConfig {
            site_utc_offset_hours: 8,
            ..Default::default()
        };
        assert_eq!(config.site_offset().local_minus_utc(), 8 * 3600);
    }
}
