//! Exponential backoff for idempotent store reads.
//!
//! Only reads go through here. Inserts are never retried: a timed-out insert
//! has an unknown outcome, and replaying it could report a ticket the buyer
//! already holds as lost to someone else.

use crate::error::EngineError;
use raffle_core::StoreError;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Backoff schedule: `initial_delay * 2^attempt`, capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: usize,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RetryPolicy {
    /// Starts a builder with three retries from 100ms up to 5s.
    #[must_use]
    pub const fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            policy: Self {
                max_retries: 3,
                initial_delay: Duration::from_millis(100),
                max_delay: Duration::from_secs(5),
            },
        }
    }

    /// Delay before retry number `attempt` (zero-based).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let factor = 1u32.checked_shl(u32::try_from(attempt).unwrap_or(u32::MAX));
        factor
            .and_then(|f| self.initial_delay.checked_mul(f))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
}

impl RetryPolicyBuilder {
    /// Retries after the first attempt.
    #[must_use]
    pub const fn max_retries(mut self, max_retries: usize) -> Self {
        self.policy.max_retries = max_retries;
        self
    }

    /// Delay before the first retry.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.policy.initial_delay = delay;
        self
    }

    /// Cap on any single delay.
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.policy.max_delay = delay;
        self
    }

    /// Finishes the policy.
    #[must_use]
    pub const fn build(self) -> RetryPolicy {
        self.policy
    }
}

/// Runs `operation` until it succeeds, fails with an error `is_retryable`
/// rejects, or the policy runs out of retries. Returns the last error.
///
/// # Errors
///
/// Propagates the final error from `operation`.
pub async fn retry_if<F, Fut, T, E, P>(
    policy: RetryPolicy,
    operation_name: &'static str,
    mut operation: F,
    is_retryable: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!(operation = operation_name, attempt, "Store call recovered");
                }
                return Ok(value);
            }
            Err(err) if !is_retryable(&err) => return Err(err),
            Err(err) if attempt >= policy.max_retries => {
                tracing::error!(
                    operation = operation_name,
                    attempt,
                    error = %err,
                    "Store call failed after retries"
                );
                return Err(err);
            }
            Err(err) => {
                let delay = policy.delay_for_attempt(attempt);
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "Store call failed, retrying"
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Runs an idempotent store read under `policy`, retrying only
/// [`StoreError::Unavailable`].
///
/// # Errors
///
/// Returns [`EngineError::StoreUnavailable`] once retries are exhausted.
pub(crate) async fn retry_store_read<F, Fut, T>(
    policy: RetryPolicy,
    operation_name: &'static str,
    operation: F,
) -> Result<T, EngineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    retry_if(policy, operation_name, operation, |err| {
        matches!(err, StoreError::Unavailable(_))
    })
    .await
    .map_err(EngineError::from)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast(max_retries: usize) -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(max_retries)
            .initial_delay(Duration::from_millis(1))
            .max_delay(Duration::from_millis(2))
            .build()
    }

    #[test]
    fn delay_doubles_until_cap() {
        let policy = RetryPolicy::builder()
            .initial_delay(Duration::from_millis(100))
            .max_delay(Duration::from_millis(500))
            .build();

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(200), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn retries_transient_errors() {
        let calls = AtomicUsize::new(0);
        let result = retry_if(
            fast(3),
            "test",
            || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err("transient".to_string())
                } else {
                    Ok(7)
                }
            },
            |_| true,
        )
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stops_on_permanent_errors() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), String> = retry_if(
            fast(5),
            "test",
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("permanent".to_string())
            },
            |err| err != "permanent",
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), String> = retry_if(
            fast(2),
            "test",
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("down".to_string())
            },
            |_| true,
        )
        .await;

        assert_eq!(result.unwrap_err(), "down");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
