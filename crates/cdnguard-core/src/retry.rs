//! Bounded retry with exponential backoff
//!
//! Every external call in the pipeline (account listing, metric queries,
//! message delivery) runs through [`retry`]. Each attempt is bounded by the
//! policy's call timeout; only errors for which [`Error::is_transient`]
//! holds are retried.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::config::ScheduleConfig;
use crate::error::{Error, Result};

/// Retry and timeout settings for one class of external call
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub base_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Timeout for each attempt
    pub call_timeout: Duration,
    /// Add up to 25% random jitter to each delay
    pub jitter: bool,
}

impl RetryPolicy {
    /// Policy derived from the schedule section
    pub fn from_schedule(schedule: &ScheduleConfig) -> Self {
        Self {
            max_attempts: schedule.retry_attempts.max(1),
            base_delay: schedule.retry_base_delay,
            max_delay: schedule.retry_max_delay,
            call_timeout: schedule.call_timeout,
            jitter: true,
        }
    }

    /// Single attempt, no retry
    pub fn once(call_timeout: Duration) -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            call_timeout,
            jitter: false,
        }
    }

    /// Delay before attempt `attempt + 1`, where `attempt` starts at 1
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self
            .base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay);

        if self.jitter && !delay.is_zero() {
            let spread = delay.as_millis() as u64 / 4;
            let extra = rand::thread_rng().gen_range(0..=spread);
            delay + Duration::from_millis(extra)
        } else {
            delay
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_schedule(&ScheduleConfig::default())
    }
}

/// Run `call` until it succeeds, fails permanently, or attempts run out
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;

    loop {
        let outcome = match tokio::time::timeout(policy.call_timeout, call()).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                operation: operation.to_string(),
                after: policy.call_timeout,
            }),
        };

        match outcome {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation, attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.backoff(attempt);
                warn!(
                    operation,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
            call_timeout: Duration::from_secs(5),
            jitter: false,
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let p = policy();
        assert_eq!(p.backoff(1), Duration::from_secs(1));
        assert_eq!(p.backoff(2), Duration::from_secs(2));
        assert_eq!(p.backoff(3), Duration::from_secs(4));
        assert_eq!(p.backoff(10), Duration::from_secs(8));
    }

    #[test]
    fn test_jitter_stays_within_a_quarter() {
        let p = RetryPolicy {
            jitter: true,
            ..policy()
        };
        for _ in 0..50 {
            let d = p.backoff(2);
            assert!(d >= Duration::from_secs(2));
            assert!(d <= Duration::from_millis(2500));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry(&policy(), "send", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(Error::transient("send", "503"))
            } else {
                Ok(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry(&policy(), "send", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::transient("send", "503"))
        })
        .await;

        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry(&policy(), "send", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::from_status("send", 400, "chat not found"))
        })
        .await;

        assert!(matches!(result, Err(Error::Upstream { status: 400, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_call_times_out() {
        let p = RetryPolicy::once(Duration::from_millis(100));
        let result: Result<()> = retry(&p, "query", || async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(Error::Timeout { .. })));
    }
}
