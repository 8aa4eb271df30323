/// Resilience primitives shared by the portal feed services
///
/// This library provides:
/// - **Circuit Breaker**: named breakers whose state lives in a shared store, so every
///   handler instance behind a load balancer sees the same open/closed decision
/// - **Timeout**: bounded waits for every dependency call
/// - **Retry**: exponential backoff with jitter, used by adapters to reconnect transparently
/// - **Presets**: default deadlines and retry policies for the feed pipeline's dependencies
///
/// # Example: Content index query behind a breaker
///
/// ```rust,no_run
/// use resilience::{presets, with_retry, CircuitBreaker, CircuitBreakerConfig, MemoryBreakerStore};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() {
///     let config = presets::content_index_config();
///     let store = Arc::new(MemoryBreakerStore::new());
///     let breaker = CircuitBreaker::new("content-index", CircuitBreakerConfig::default(), store);
///
///     let result = breaker.call(|| async {
///         with_retry(&config.retry, || async {
///             // query the index here
///             Ok::<_, String>(())
///         }).await
///     }).await;
/// }
/// ```

pub mod circuit_breaker;
pub mod presets;
pub mod retry;
pub mod store;
pub mod timeout;

pub use circuit_breaker::{
    BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState,
};
pub use presets::{
    content_index_config, content_store_config, feature_store_config, shared_cache_config,
    DependencyConfig,
};
pub use retry::{with_retry, RetryConfig};
pub use store::{BreakerStore, MemoryBreakerStore, StoreError};
pub use timeout::{with_timeout, with_timeout_result, TimeoutError};
