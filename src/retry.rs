use std::future::Future;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::error::FetchError;

#[derive(Debug, Clone, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self) -> Backoff {
        Backoff {
            policy: self.clone(),
            attempt: 0,
        }
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Retry(Duration),
    GiveUp,
}

/// Retry state: how many attempts have failed so far and when to try next.
///
/// Pure state machine; the caller owns the clock.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
    attempt: u32,
}

impl Backoff {
    /// Attempts that have failed so far.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Record a failed attempt and decide the next step.
    pub fn on_failure(&mut self, err: &FetchError) -> Step {
        self.attempt += 1;
        if !err.is_transient() || self.attempt >= self.policy.max_attempts {
            return Step::GiveUp;
        }
        Step::Retry(self.delay_for(self.attempt))
    }

    /// Delay before attempt `n + 1`, doubling from the base and capped.
    fn delay_for(&self, failed: u32) -> Duration {
        let factor = 2u64.saturating_pow(failed.saturating_sub(1));
        let ms = self
            .policy
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.policy.max_delay_ms);
        Duration::from_millis(ms)
    }
}

/// Run `op` until it succeeds, fails permanently, or the policy is exhausted.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut backoff = policy.backoff();
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) => match backoff.on_failure(&e) {
                Step::Retry(delay) => {
                    warn!(
                        "{} failed (attempt {}/{}): {}, backing off {:.1}s",
                        label,
                        backoff.attempts(),
                        policy.max_attempts,
                        e,
                        delay.as_secs_f64()
                    );
                    tokio::time::sleep(delay).await;
                }
                Step::GiveUp => return Err(e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay_ms: 100,
            max_delay_ms: 250,
        }
    }

    #[test]
    fn transient_errors_back_off_exponentially() {
        let mut b = policy(4).backoff();
        assert_eq!(b.on_failure(&FetchError::Timeout), Step::Retry(Duration::from_millis(100)));
        assert_eq!(b.on_failure(&FetchError::RateLimited), Step::Retry(Duration::from_millis(200)));
        // capped at max_delay_ms
        assert_eq!(
            b.on_failure(&FetchError::Server { status: 503 }),
            Step::Retry(Duration::from_millis(250))
        );
        assert_eq!(b.on_failure(&FetchError::Timeout), Step::GiveUp);
        assert_eq!(b.attempts(), 4);
    }

    #[test]
    fn permanent_error_gives_up_immediately() {
        let mut b = policy(3).backoff();
        assert_eq!(b.on_failure(&FetchError::Client { status: 404 }), Step::GiveUp);
        assert_eq!(b.attempts(), 1);
    }

    #[test]
    fn single_attempt_policy_never_retries() {
        let mut b = policy(1).backoff();
        assert_eq!(b.on_failure(&FetchError::Timeout), Step::GiveUp);
    }

    #[tokio::test]
    async fn with_retry_succeeds_after_transient_failures() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let p = RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 0,
            max_delay_ms: 0,
        };
        let out = with_retry(&p, "test", move || async move {
            match calls.fetch_add(1, Ordering::SeqCst) {
                0 | 1 => Err(FetchError::Server { status: 500 }),
                _ => Ok(7),
            }
        })
        .await;
        assert_eq!(out.unwrap(), 7);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn with_retry_stops_at_bound() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let p = RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 0,
            max_delay_ms: 0,
        };
        let out: Result<(), _> = with_retry(&p, "test", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(FetchError::Timeout)
        })
        .await;
        assert!(matches!(out, Err(FetchError::Timeout)));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }
}
