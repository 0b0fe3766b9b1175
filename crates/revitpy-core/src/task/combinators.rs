//! Free-standing helpers for code that runs outside a queued task.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use super::retry::RetryPolicy;
use crate::cancel::{CancellationToken, OperationCancelled};
use crate::domain::TaskError;
use crate::error::BoxError;

/// Await `fut`, failing with [`TaskError::Timeout`] once `limit` elapses.
pub async fn with_timeout<F: Future>(limit: Duration, fut: F) -> Result<F::Output, TaskError> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| TaskError::Timeout(limit))
}

/// Await `fut` unless `token` cancels first.
pub async fn cancellable<F: Future>(
    token: &CancellationToken,
    fut: F,
) -> Result<F::Output, OperationCancelled> {
    token.throw_if_cancellation_requested()?;
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(OperationCancelled::new(token.reason())),
        out = fut => Ok(out),
    }
}

/// Run `op` up to `policy.max_attempts()` times with constant backoff.
///
/// `op` receives the 1-indexed attempt number. Cancellation (either the
/// token or an `OperationCancelled` returned by `op`) ends the loop without
/// further attempts.
pub async fn with_retry<F, Fut, T>(
    policy: &RetryPolicy,
    token: Option<&CancellationToken>,
    mut op: F,
) -> Result<T, TaskError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, BoxError>>,
{
    let max_attempts = policy.max_attempts();
    let mut attempt = 0;
    loop {
        if let Some(token) = token {
            token.throw_if_cancellation_requested()?;
        }
        attempt += 1;
        let err = match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => TaskError::from_boxed(err),
        };
        if err.is_cancelled() || attempt >= max_attempts {
            return Err(err);
        }
        warn!(attempt, max_attempts, error = %err, "operation failed, retrying");
        policy.backoff(attempt, token).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancellationTokenSource;

    #[tokio::test]
    async fn timeout_wraps_slow_futures() {
        let err = with_timeout(Duration::from_millis(10), tokio::time::sleep(Duration::from_secs(5)))
            .await
            .unwrap_err();
        assert!(err.is_timeout());

        let ok = with_timeout(Duration::from_secs(1), async { 3 }).await.unwrap();
        assert_eq!(ok, 3);
    }

    #[tokio::test]
    async fn cancellable_returns_when_token_fires() {
        let source = CancellationTokenSource::new();
        source.cancel_after(Duration::from_millis(10), Some("shutdown"));
        let token = source.token();

        let err = cancellable(&token, tokio::time::sleep(Duration::from_secs(5)))
            .await
            .unwrap_err();
        assert_eq!(err.reason(), Some("shutdown"));
    }

    #[tokio::test]
    async fn retry_counts_attempts() {
        let policy = RetryPolicy::new(2, Duration::ZERO);
        let mut seen = Vec::new();
        let out = with_retry(&policy, None, |attempt| {
            seen.push(attempt);
            async move {
                if attempt < 3 {
                    Err::<u32, BoxError>("transient".into())
                } else {
                    Ok(attempt)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(out, 3);
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn retry_gives_up_on_cancellation() {
        let policy = RetryPolicy::new(5, Duration::ZERO);
        let mut calls = 0;
        let err = with_retry(&policy, None, |_| {
            calls += 1;
            async { Err::<(), BoxError>(Box::new(OperationCancelled::new(None))) }
        })
        .await
        .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(calls, 1);
    }
}
