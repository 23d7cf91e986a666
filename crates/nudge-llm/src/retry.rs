//! Bounded retry with exponential backoff for provider calls.

use std::time::Duration;

use crate::error::{LlmError, Result};

/// Time and retry budget for a single logical provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Sleep before the first retry; doubled after each retry.
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_retries: 2,
            initial_backoff: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// Upper bound on the wall time a call under this policy can take.
    pub fn worst_case(&self) -> Duration {
        let attempts = self.max_retries + 1;
        let mut total = self.timeout * attempts;
        let mut backoff = self.initial_backoff;
        for _ in 0..self.max_retries {
            total += backoff;
            backoff *= 2;
        }
        total
    }
}

/// Run `f` under `policy`, retrying retryable failures with exponential backoff.
///
/// Each attempt is bounded by `policy.timeout`; an attempt that runs out of
/// time counts as a retryable [`LlmError::Timeout`]. Non-retryable errors are
/// returned immediately.
pub async fn with_retry<F, Fut, T>(policy: RetryPolicy, provider: &str, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut backoff = policy.initial_backoff;
    let mut attempt = 0;

    loop {
        let outcome = match tokio::time::timeout(policy.timeout, f()).await {
            Ok(result) => result,
            Err(_) => Err(LlmError::Timeout(policy.timeout)),
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() || attempt >= policy.max_retries => return Err(e),
            Err(e) => {
                attempt += 1;
                tracing::warn!(
                    provider,
                    attempt,
                    max_retries = policy.max_retries,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Provider call failed, retrying"
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick() -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_millis(100),
            max_retries: 2,
            initial_backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = with_retry(quick(), "test", || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(LlmError::Network("flaky".into()))
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<()> = with_retry(quick(), "test", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(LlmError::Network("down".into()))
            }
        })
        .await;

        assert!(matches!(result, Err(LlmError::Network(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_fast() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<()> = with_retry(quick(), "test", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(LlmError::Auth("nope".into()))
            }
        })
        .await;

        assert!(matches!(result, Err(LlmError::Auth(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_slow_attempt_times_out() {
        let policy = RetryPolicy {
            timeout: Duration::from_millis(10),
            max_retries: 0,
            initial_backoff: Duration::from_millis(1),
        };
        let result: Result<()> = with_retry(policy, "test", || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(LlmError::Timeout(_))));
    }

    #[test]
    fn test_worst_case() {
        let policy = RetryPolicy {
            timeout: Duration::from_millis(100),
            max_retries: 2,
            initial_backoff: Duration::from_millis(10),
        };
        // 3 attempts + 10ms + 20ms of backoff
        assert_eq!(policy.worst_case(), Duration::from_millis(330));
    }
}
