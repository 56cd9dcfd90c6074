//! Retry with exponential backoff.
//!
//! All MongoDB admin calls and probe re-checks go through one small policy
//! value instead of scattered sleeps. Only errors whose
//! [`is_retryable`](crate::error::OperatorError::is_retryable) is true are
//! retried; everything else propagates immediately.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

use crate::error::{OperatorError, Result};

/// Retry policy: base delay, growth factor, delay cap, attempt budget.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub base: Duration,
    /// Multiplier applied per attempt.
    pub factor: f64,
    /// Upper bound on any single delay.
    pub cap: Duration,
    /// Total attempts, including the first.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::admin()
    }
}

impl RetryPolicy {
    /// Policy for MongoDB admin commands within a cycle.
    pub fn admin() -> Self {
        Self {
            base: Duration::from_secs(1),
            factor: 2.0,
            cap: Duration::from_secs(30),
            max_attempts: 5,
        }
    }

    /// Policy for re-checking nodes in a transient state.
    pub fn probe(attempts: u32) -> Self {
        Self {
            base: Duration::from_millis(500),
            factor: 2.0,
            cap: Duration::from_secs(8),
            max_attempts: attempts.max(1),
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self.base.as_secs_f64() * self.factor.powi(attempt.saturating_sub(1) as i32);
        Duration::from_secs_f64(exp.min(self.cap.as_secs_f64()))
    }

    /// Execute `op`, retrying retryable failures until the budget runs out.
    pub async fn execute<F, Fut, T>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        let mut last_error = None;

        while attempt < self.max_attempts {
            attempt += 1;

            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if !e.is_retryable() {
                        return Err(e);
                    }
                    last_error = Some(e);

                    if attempt < self.max_attempts {
                        let delay = self.delay_for_attempt(attempt);
                        tracing::debug!(
                            attempt,
                            max_attempts = self.max_attempts,
                            delay_ms = delay.as_millis() as u64,
                            "retrying after failure"
                        );
                        sleep(delay).await;
                    }
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| OperatorError::Internal("retry exhausted without error".into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_delay_growth_and_cap() {
        let policy = RetryPolicy {
            base: Duration::from_secs(1),
            factor: 2.0,
            cap: Duration::from_secs(30),
            max_attempts: 5,
        };
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_eventual_success() {
        let policy = RetryPolicy {
            base: Duration::from_millis(1),
            factor: 2.0,
            cap: Duration::from_millis(4),
            max_attempts: 4,
        };
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = Arc::clone(&calls);

        let result: Result<u32> = policy
            .execute(|| {
                let calls = Arc::clone(&calls2);
                async move {
                    if calls.fetch_add(1, Ordering::Relaxed) < 2 {
                        Err(OperatorError::Timeout(10))
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_short_circuits() {
        let policy = RetryPolicy::probe(3);
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = Arc::clone(&calls);

        let result: Result<()> = policy
            .execute(|| {
                let calls = Arc::clone(&calls2);
                async move {
                    calls.fetch_add(1, Ordering::Relaxed);
                    Err(OperatorError::Config("bad".into()))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_budget_exhaustion() {
        let policy = RetryPolicy {
            base: Duration::from_millis(1),
            factor: 1.0,
            cap: Duration::from_millis(1),
            max_attempts: 2,
        };
        let result: Result<()> = policy
            .execute(|| async { Err(OperatorError::Timeout(5)) })
            .await;
        assert!(matches!(result, Err(OperatorError::Timeout(_))));
    }
}
