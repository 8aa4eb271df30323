/// Retry policy with exponential backoff and jitter
///
/// Adapters wrap their own I/O in `with_retry` so reconnect-on-failure stays inside
/// the client handle instead of leaking into callers.
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
    /// Add random jitter to backoff (±30%)
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 1,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }
}

/// Execute `f` until it succeeds or retries are exhausted, returning the last error.
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, mut f: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    let mut backoff = config.initial_backoff;

    loop {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if attempt >= config.max_retries {
                    return Err(e);
                }
                attempt += 1;

                let delay = calculate_backoff(backoff, config.jitter);
                warn!(
                    error = %e,
                    "Retry attempt {}/{}, waiting {:?}",
                    attempt, config.max_retries, delay
                );
                tokio::time::sleep(delay).await;

                backoff = Duration::from_millis(
                    ((backoff.as_millis() as f64 * config.backoff_multiplier)
                        .min(config.max_backoff.as_millis() as f64)) as u64,
                );
            }
        }
    }
}

fn calculate_backoff(base: Duration, jitter: bool) -> Duration {
    if jitter {
        let factor = 1.0 + rand::thread_rng().gen_range(-0.3..0.3);
        Duration::from_millis((base.as_millis() as f64 * factor) as u64)
    } else {
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast() -> RetryConfig {
        RetryConfig {
            max_retries: 2,
            initial_backoff: Duration::from_millis(1),
            jitter: false,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_retry_recovers_after_transient_failure() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();

        let result = with_retry(&fast(), move || {
            let attempt = c.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    Err("connection reset".to_string())
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_returns_last_error() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();

        let result: Result<(), String> = with_retry(&fast(), move || {
            let attempt = c.fetch_add(1, Ordering::SeqCst);
            async move { Err(format!("failure {}", attempt)) }
        })
        .await;

        assert_eq!(result.unwrap_err(), "failure 2");
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_no_retry_policy_runs_once() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();

        let _: Result<(), String> = with_retry(&RetryConfig::none(), move || {
            c.fetch_add(1, Ordering::SeqCst);
            async { Err("nope".to_string()) }
        })
        .await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
