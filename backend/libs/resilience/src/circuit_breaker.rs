/// Named circuit breaker with shared, TTL-scoped state
///
/// State transitions:
/// - Closed → Open: the Nth failure inside the rolling failure window
/// - Open → Closed: the recovery timeout expires (the stored state simply ages out);
///   the next call is attempted with a fresh failure counter
/// - Any success while closed resets the failure counter
///
/// There is no half-open probing phase. All state is persisted through a
/// [`BreakerStore`] under `v1:breaker:{name}` so that every request handler
/// sharing the store observes the same decision.
use crate::store::BreakerStore;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls pass through to the dependency
    Closed,
    /// Calls fail fast without touching the dependency
    Open,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failures inside one rolling window that open the circuit
    pub failure_threshold: u32,
    /// Lifetime of the failure counter, measured from the first failure
    pub failure_window: Duration,
    /// How long the circuit stays open
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window: Duration::from_secs(60),
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

/// Persisted breaker state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub failures: u32,
    pub window_started_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_until_ms: Option<i64>,
}

impl BreakerSnapshot {
    fn open_remaining(&self, now_ms: i64) -> Option<Duration> {
        self.open_until_ms
            .filter(|until| *until > now_ms)
            .map(|until| Duration::from_millis((until - now_ms) as u64))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    #[error("circuit breaker '{name}' is open - failing fast (retry in {retry_after:?})")]
    Open { name: String, retry_after: Duration },
    #[error("call failed: {0}")]
    Inner(E),
}

impl<E> CircuitBreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, CircuitBreakerError::Open { .. })
    }
}

#[derive(Clone)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    store: Arc<dyn BreakerStore>,
}

impl CircuitBreaker {
    pub fn new(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        store: Arc<dyn BreakerStore>,
    ) -> Self {
        let name = name.into();
        debug!(
            breaker = %name,
            failure_threshold = config.failure_threshold,
            window = ?config.failure_window,
            recovery = ?config.recovery_timeout,
            "Circuit breaker created"
        );
        Self {
            name,
            config,
            store,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn key(&self) -> String {
        format!("v1:breaker:{}", self.name)
    }

    /// Execute a future with circuit breaker protection.
    ///
    /// While open, `f` is never invoked.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let snapshot = self.load().await;
        if let Some(retry_after) = snapshot.open_remaining(now_ms()) {
            debug!(breaker = %self.name, ?retry_after, "Circuit open - rejecting call");
            return Err(CircuitBreakerError::Open {
                name: self.name.clone(),
                retry_after,
            });
        }

        match f().await {
            Ok(value) => {
                if snapshot.failures > 0 || snapshot.open_until_ms.is_some() {
                    self.reset().await;
                }
                Ok(value)
            }
            Err(err) => {
                self.record_failure().await;
                Err(CircuitBreakerError::Inner(err))
            }
        }
    }

    /// Current state as seen through the shared store
    pub async fn state(&self) -> CircuitState {
        if self.load().await.open_remaining(now_ms()).is_some() {
            CircuitState::Open
        } else {
            CircuitState::Closed
        }
    }

    pub async fn snapshot(&self) -> BreakerSnapshot {
        self.load().await
    }

    async fn record_failure(&self) {
        let now = now_ms();
        let mut snapshot = self.load().await;

        // An expired open period or window starts a fresh count.
        let window_ms = self.config.failure_window.as_millis() as i64;
        if snapshot.open_until_ms.is_some_and(|until| until <= now)
            || snapshot.failures == 0
            || now - snapshot.window_started_ms >= window_ms
        {
            snapshot = BreakerSnapshot {
                failures: 0,
                window_started_ms: now,
                open_until_ms: None,
            };
        }

        snapshot.failures += 1;

        let ttl = if snapshot.failures >= self.config.failure_threshold {
            let recovery_ms = self.config.recovery_timeout.as_millis() as i64;
            snapshot.open_until_ms = Some(now + recovery_ms);
            warn!(
                breaker = %self.name,
                failures = snapshot.failures,
                "Circuit breaker: Closed → Open for {:?}",
                self.config.recovery_timeout
            );
            self.config.recovery_timeout
        } else {
            let elapsed = (now - snapshot.window_started_ms).max(0) as u64;
            self.config
                .failure_window
                .saturating_sub(Duration::from_millis(elapsed))
                .max(Duration::from_millis(1))
        };

        self.save(&snapshot, ttl).await;
    }

    async fn reset(&self) {
        info!(breaker = %self.name, "Circuit breaker: failure counter reset");
        self.save(&BreakerSnapshot::default(), Duration::ZERO).await;
    }

    async fn load(&self) -> BreakerSnapshot {
        match self.store.load(&self.key()).await {
            Ok(Some(raw)) => serde_json::from_slice(&raw).unwrap_or_else(|e| {
                warn!(breaker = %self.name, error = %e, "Discarding unreadable breaker state");
                BreakerSnapshot::default()
            }),
            Ok(None) => BreakerSnapshot::default(),
            Err(e) => {
                // Unknown state is treated as closed so the dependency is still tried.
                warn!(breaker = %self.name, error = %e, "Breaker store read failed");
                BreakerSnapshot::default()
            }
        }
    }

    async fn save(&self, snapshot: &BreakerSnapshot, ttl: Duration) {
        let raw = match serde_json::to_vec(snapshot) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(breaker = %self.name, error = %e, "Breaker state serialization failed");
                return;
            }
        };
        if let Err(e) = self.store.save(&self.key(), raw, ttl).await {
            warn!(breaker = %self.name, error = %e, "Breaker store write failed");
        }
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
