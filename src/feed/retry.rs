//! Bounded retry with exponential backoff for external calls.

use std::future::Future;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::error::FeedError;
use crate::metrics;

/// Retry and backoff settings owned by the transport adapters.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Initial backoff delay in milliseconds.
    pub initial_delay_ms: u64,
    /// Maximum backoff delay in seconds.
    pub max_delay_s: u64,
    /// Backoff multiplier (e.g., 2.0 for exponential).
    pub backoff_multiplier: f64,
    /// Attempts before giving up.
    pub max_attempts: u32,
    /// Deadline for a single attempt.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            max_delay_s: 30,
            backoff_multiplier: 2.0,
            max_attempts: 5,
            timeout: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Create from config values.
    pub fn from_config(
        initial_delay_ms: u64,
        max_delay_s: u64,
        max_attempts: u32,
        timeout_s: u64,
    ) -> Self {
        Self {
            initial_delay_ms,
            max_delay_s,
            max_attempts: max_attempts.max(1),
            timeout: Duration::from_secs(timeout_s),
            ..Default::default()
        }
    }

    /// Calculate next delay with exponential backoff.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let delay_ms = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        let max_delay_ms = self.max_delay_s * 1000;
        let clamped_ms = delay_ms.min(max_delay_ms as f64) as u64;
        Duration::from_millis(clamped_ms)
    }

    /// Run `attempt` until it succeeds, each try bounded by `timeout`.
    ///
    /// Sleeps `next_delay` between failures and gives up with
    /// [`FeedError::RetriesExhausted`] after `max_attempts`.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut attempt: F) -> Result<T, FeedError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FeedError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut last_error = String::new();

        for n in 0..attempts {
            let start = Instant::now();
            let outcome = match tokio::time::timeout(self.timeout, attempt()).await {
                Ok(result) => result,
                Err(_) => Err(FeedError::Timeout {
                    operation: operation.to_string(),
                    timeout_s: self.timeout.as_secs(),
                }),
            };
            metrics::record_fetch_latency(start, operation);

            match outcome {
                Ok(value) => return Ok(value),
                Err(e) => {
                    metrics::inc_feed_fetch_failures(operation);
                    last_error = e.to_string();
                    if n + 1 < attempts {
                        let delay = self.next_delay(n);
                        warn!(
                            operation,
                            attempt = n + 1,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Fetch failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Err(FeedError::RetriesExhausted {
            operation: operation.to_string(),
            attempts,
            last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy {
            initial_delay_ms: 1,
            max_delay_s: 1,
            backoff_multiplier: 2.0,
            max_attempts: 3,
            timeout: Duration::from_millis(200),
        }
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.next_delay(0), Duration::from_millis(1000));
        assert_eq!(policy.next_delay(1), Duration::from_millis(2000));
        assert_eq!(policy.next_delay(3), Duration::from_millis(8000));
        assert_eq!(policy.next_delay(10), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = fast()
            .run("test", || async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(FeedError::Decode("flaky".into()))
                } else {
                    Ok(7)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = fast()
            .run("test", || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(FeedError::Decode("down".into()))
            })
            .await;

        assert!(matches!(
            result,
            Err(FeedError::RetriesExhausted { attempts: 3, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn slow_attempt_times_out() {
        let policy = RetryPolicy {
            max_attempts: 1,
            timeout: Duration::from_millis(10),
            ..fast()
        };
        let result: Result<(), _> = policy
            .run("slow", || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        match result {
            Err(FeedError::RetriesExhausted { last_error, .. }) => {
                assert!(last_error.contains("timed out"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
