//! Retry policy for activity dispatch.
//!
//! Transient store failures are retried with exponential backoff plus a
//! small jitter, up to a configured attempt ceiling. Exhaustion converts the
//! failure into a batch failure at the orchestrator; non-transient errors
//! are never retried.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::Result;
use crate::metrics::{labels as metrics_labels, names as metrics_names};

/// Default maximum attempts (first try plus retries).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;

/// Base backoff duration for retries.
const BACKOFF_BASE: Duration = Duration::from_millis(100);

/// Maximum backoff duration.
const BACKOFF_MAX: Duration = Duration::from_secs(5);

/// Per-activity retry policy applied uniformly by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles each attempt.
    pub base_delay: Duration,
    /// Ceiling on the computed delay (jitter excluded).
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: BACKOFF_BASE,
            max_delay: BACKOFF_MAX,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with the given attempt ceiling and default delays.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Backoff delay before retrying after `attempt` (1-indexed) failed.
    ///
    /// Exponential doubling capped at `max_delay`, plus 0-50ms of jitter so
    /// parallel batches hitting the same throttled store spread out.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let doubled = self
            .base_delay
            .saturating_mul(2_u32.saturating_pow(attempt.saturating_sub(1)));
        doubled.min(self.max_delay) + Duration::from_millis(rand_jitter())
    }

    /// Runs `op`, retrying transient errors up to the attempt ceiling.
    ///
    /// Only [`Error::Transient`](crate::error::Error::Transient) is retried;
    /// any other error (including conflicts, which executors resolve before
    /// reaching this layer) propagates immediately.
    ///
    /// # Errors
    ///
    /// Returns the last error once attempts are exhausted, or the first
    /// non-transient error.
    pub async fn run<T, F, Fut>(&self, activity: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        activity,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "transient failure, retrying: {err}"
                    );
                    metrics::counter!(
                        metrics_names::RETRIES_TOTAL,
                        metrics_labels::ACTIVITY => activity.to_string(),
                    )
                    .increment(1);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Generates random jitter for backoff (0-50ms).
fn rand_jitter() -> u64 {
    // Subsecond-nanos seed keeps jitter dependency-free
    // (avoids full rand dependency for this simple case)
    use std::time::SystemTime;
    let seed = u64::from(
        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos(),
    );
    seed % 50
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    #[test]
    fn delay_doubles_then_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
        };

        // Jitter adds at most 50ms on top of the capped exponential.
        assert!(policy.delay_for(1) >= Duration::from_millis(100));
        assert!(policy.delay_for(2) >= Duration::from_millis(200));
        assert!(policy.delay_for(8) <= Duration::from_millis(1050));
    }

    #[tokio::test]
    async fn retries_transient_until_success() {
        let attempts = AtomicU32::new(0);
        let policy = fast_policy(4);

        let result = policy
            .run("test", || {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(Error::transient("throttled"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_surfaces_last_error() {
        let attempts = AtomicU32::new(0);
        let policy = fast_policy(3);

        let result: Result<()> = policy
            .run("test", || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::transient("still throttled")) }
            })
            .await;

        assert!(matches!(result, Err(Error::Transient { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_transient_errors_fail_fast() {
        let attempts = AtomicU32::new(0);
        let policy = fast_policy(4);

        let result: Result<()> = policy
            .run("test", || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::storage("rows gone")) }
            })
            .await;

        assert!(matches!(result, Err(Error::Storage { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
