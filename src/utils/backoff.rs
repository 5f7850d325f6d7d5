use crate::error::PageError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, warn};

/// Failure classification consumed by [`BackoffPolicy::retry`].
pub trait Retryable {
    fn is_retryable(&self) -> bool;

    fn is_rate_limit(&self) -> bool {
        false
    }

    /// Server-provided wait hint (e.g. `Retry-After`).
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl Retryable for PageError {
    fn is_retryable(&self) -> bool {
        PageError::is_retryable(self)
    }

    fn is_rate_limit(&self) -> bool {
        PageError::is_rate_limit(self)
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            PageError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Last error of a retried operation plus the number of attempts made.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryFailure<E> {
    pub attempts: u32,
    pub error: E,
}

/// Exponential backoff with cap, jitter and a longer schedule for rate limits.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Fraction in [0, 1] of each delay that may be randomly removed.
    pub jitter: f64,
    pub rate_limit_multiplier: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.2,
            rate_limit_multiplier: 4.0,
        }
    }
}

impl BackoffPolicy {
    /// Policy allowing `max_retries` retries after the first attempt.
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_attempts: max_retries.saturating_add(1),
            ..Self::default()
        }
    }

    /// No waiting between attempts; used by tests and local sources.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
            jitter: 0.0,
            rate_limit_multiplier: 1.0,
        }
    }

    /// Delay before retry number `attempt` (1 for the first retry).
    pub fn delay_for(&self, attempt: u32, rate_limited: bool) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let mut delay = self.base_delay.as_secs_f64() * self.multiplier.max(1.0).powi(exponent);
        let mut cap = self.max_delay.as_secs_f64();

        if rate_limited {
            delay *= self.rate_limit_multiplier.max(1.0);
            cap *= self.rate_limit_multiplier.max(1.0);
        }

        delay = delay.min(cap);

        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter > 0.0 && delay > 0.0 {
            let factor = 1.0 - jitter * rand::thread_rng().gen::<f64>();
            delay *= factor;
        }

        Duration::from_secs_f64(delay.max(0.0))
    }

    /// Wait time for a failed attempt, honouring a server hint when present.
    fn wait_for<E: Retryable>(&self, attempt: u32, error: &E) -> Duration {
        let computed = self.delay_for(attempt, error.is_rate_limit());
        match error.retry_after() {
            Some(hint) => hint.max(computed),
            None => computed,
        }
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error,
    /// or the attempt budget is spent. The closure receives the 1-based attempt.
    pub async fn retry<F, Fut, T, E>(
        &self,
        operation_name: &str,
        mut operation: F,
    ) -> Result<T, RetryFailure<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + std::fmt::Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            match operation(attempt).await {
                Ok(result) => {
                    if attempt > 1 {
                        warn!(
                            "Operation '{}' succeeded after {} attempts",
                            operation_name, attempt
                        );
                    }
                    return Ok(result);
                }
                Err(err) if !err.is_retryable() => {
                    error!(
                        "Operation '{}' failed with a non-retryable error: {}",
                        operation_name, err
                    );
                    return Err(RetryFailure {
                        attempts: attempt,
                        error: err,
                    });
                }
                Err(err) => {
                    if attempt >= max_attempts {
                        error!(
                            "Operation '{}' failed after {} attempts. Final error: {}",
                            operation_name, attempt, err
                        );
                        return Err(RetryFailure {
                            attempts: attempt,
                            error: err,
                        });
                    }

                    let delay = self.wait_for(attempt, &err);
                    warn!(
                        "Operation '{}' failed (attempt {}/{}): {}. Retrying in {:?}...",
                        operation_name, attempt, max_attempts, err, delay
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fixed_policy() -> BackoffPolicy {
        BackoffPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
            multiplier: 2.0,
            jitter: 0.0,
            rate_limit_multiplier: 4.0,
        }
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = fixed_policy();
        assert_eq!(policy.delay_for(1, false), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2, false), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3, false), Duration::from_millis(400));
        assert_eq!(policy.delay_for(10, false), Duration::from_millis(1000));
    }

    #[test]
    fn test_rate_limit_waits_longer() {
        let policy = fixed_policy();
        assert_eq!(policy.delay_for(1, true), Duration::from_millis(400));
        assert!(policy.delay_for(3, true) > policy.delay_for(3, false));
        assert_eq!(policy.delay_for(10, true), Duration::from_millis(4000));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = BackoffPolicy {
            jitter: 0.5,
            ..fixed_policy()
        };
        for _ in 0..50 {
            let delay = policy.delay_for(2, false);
            assert!(delay <= Duration::from_millis(200));
            assert!(delay >= Duration::from_millis(100));
        }
    }

    #[test]
    fn test_retry_after_hint_is_honoured() {
        let policy = fixed_policy();
        let err = PageError::RateLimited {
            retry_after: Some(Duration::from_secs(7)),
        };
        assert_eq!(policy.wait_for(1, &err), Duration::from_secs(7));
    }

    #[tokio::test]
    async fn test_retry_success_on_third_attempt() {
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = attempts.clone();

        let result = BackoffPolicy::immediate(3)
            .retry("test_operation", |_| {
                let attempts = attempts_clone.clone();
                async move {
                    let current = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    if current < 3 {
                        Err(PageError::Server(503))
                    } else {
                        Ok("success")
                    }
                }
            })
            .await;

        assert_eq!(result, Ok("success"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausted() {
        let result = BackoffPolicy::immediate(2)
            .retry("test_operation", |_| async {
                Err::<(), _>(PageError::Timeout(Duration::from_secs(1)))
            })
            .await;

        let failure = result.unwrap_err();
        assert_eq!(failure.attempts, 2);
        assert_eq!(failure.error, PageError::Timeout(Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn test_non_retryable_error_stops_immediately() {
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = attempts.clone();

        let result = BackoffPolicy::immediate(5)
            .retry("test_operation", |_| {
                let attempts = attempts_clone.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(PageError::Client(400))
                }
            })
            .await;

        assert_eq!(result.unwrap_err().attempts, 1);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_with_max_retries() {
        assert_eq!(BackoffPolicy::with_max_retries(3).max_attempts, 4);
        assert_eq!(BackoffPolicy::with_max_retries(0).max_attempts, 1);
    }
}
