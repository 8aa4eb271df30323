/// Bounded waits for dependency calls
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

#[derive(Debug, thiserror::Error)]
pub enum TimeoutError<E> {
    #[error("{operation} timed out after {after:?}")]
    Elapsed {
        operation: &'static str,
        after: Duration,
    },
    #[error("{0}")]
    Failed(E),
}

impl<E> TimeoutError<E> {
    pub fn is_elapsed(&self) -> bool {
        matches!(self, TimeoutError::Elapsed { .. })
    }
}

/// Execute a future, giving up after `duration`.
///
/// Dropping the inner future on expiry abandons the in-flight request.
pub async fn with_timeout<F, T>(
    operation: &'static str,
    duration: Duration,
    future: F,
) -> Result<T, TimeoutError<std::convert::Infallible>>
where
    F: Future<Output = T>,
{
    timeout(duration, future)
        .await
        .map_err(|_| TimeoutError::Elapsed {
            operation,
            after: duration,
        })
}

/// Execute a fallible future with a deadline, keeping the inner error type.
pub async fn with_timeout_result<F, T, E>(
    operation: &'static str,
    duration: Duration,
    future: F,
) -> Result<T, TimeoutError<E>>
where
    F: Future<Output = Result<T, E>>,
{
    match timeout(duration, future).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(TimeoutError::Failed(e)),
        Err(_) => Err(TimeoutError::Elapsed {
            operation,
            after: duration,
        }),
    }
}
