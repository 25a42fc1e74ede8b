//! Retry with exponential backoff for store and feed calls

use std::time::Duration;

/// Errors that know whether another attempt could succeed.
pub trait Retryable {
    fn is_retryable(&self) -> bool;

    /// Server-requested delay before the next attempt, if any.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Bounded retry settings.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub max_retries: u32,
    /// Delay unit; attempt `n` waits `base_delay * 2^n`.
    pub base_delay: Duration,
    /// Upper bound for any single wait, including server-requested ones.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Policy that retries without sleeping (tests, in-memory stores).
    pub const fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Longest [`retry_with_backoff`] runs when each attempt takes
    /// `per_attempt`, waiting out the backoff schedule between attempts.
    pub fn max_elapsed(&self, per_attempt: Duration) -> Duration {
        let attempts = per_attempt.saturating_mul(self.max_retries.saturating_add(1));
        (1..=self.max_retries).fold(attempts, |total, attempt| {
            total.saturating_add(backoff_duration(self.base_delay, attempt).min(self.max_delay))
        })
    }

    fn delay_for<E: Retryable>(&self, attempt: u32, err: &E) -> Duration {
        let delay = err
            .retry_after()
            .unwrap_or_else(|| backoff_duration(self.base_delay, attempt));
        delay.min(self.max_delay)
    }
}

/// Exponential backoff: `base * 2^attempt` (base=1s gives 2s, 4s, 8s, ...)
pub fn backoff_duration(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt))
}

/// Retry a fallible operation with exponential backoff.
///
/// Non-retryable errors return immediately; retryable ones are retried up to
/// `policy.max_retries` times. Returns the final `Err` on exhaustion.
pub fn retry_with_backoff<T, E>(
    label: &str,
    policy: &RetryPolicy,
    mut attempt_fn: impl FnMut() -> Result<T, E>,
) -> Result<T, E>
where
    E: Retryable + std::fmt::Display,
{
    let mut attempt = 0u32;
    loop {
        match attempt_fn() {
            Ok(v) => return Ok(v),
            Err(e) if attempt < policy.max_retries && e.is_retryable() => {
                attempt += 1;
                let delay = policy.delay_for(attempt, &e);
                log::debug!(
                    "{label}: attempt {attempt}/{} failed: {e}, retrying in {delay:?}",
                    policy.max_retries
                );
                if !delay.is_zero() {
                    std::thread::sleep(delay);
                }
            }
            Err(e) => {
                if e.is_retryable() {
                    log::warn!("{label}: giving up after {attempt} retries: {e}");
                } else {
                    log::debug!("{label}: not retryable: {e}");
                }
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct TestErr(bool);

    impl std::fmt::Display for TestErr {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "test error (retryable={})", self.0)
        }
    }

    impl Retryable for TestErr {
        fn is_retryable(&self) -> bool {
            self.0
        }
    }

    #[test]
    fn backoff_exponential() {
        let base = Duration::from_secs(1);
        assert_eq!(backoff_duration(base, 1), Duration::from_secs(2));
        assert_eq!(backoff_duration(base, 2), Duration::from_secs(4));
        assert_eq!(backoff_duration(base, 3), Duration::from_secs(8));
    }

    #[test]
    fn retries_until_success() {
        let mut calls = 0;
        let result = retry_with_backoff("op", &RetryPolicy::immediate(3), || {
            calls += 1;
            if calls < 3 { Err(TestErr(true)) } else { Ok(calls) }
        });
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn bounded_attempts() {
        let mut calls = 0;
        let result: Result<(), _> = retry_with_backoff("op", &RetryPolicy::immediate(2), || {
            calls += 1;
            Err(TestErr(true))
        });
        assert!(result.is_err());
        assert_eq!(calls, 3);
    }

    #[test]
    fn non_retryable_fails_fast() {
        let mut calls = 0;
        let result: Result<(), _> = retry_with_backoff("op", &RetryPolicy::immediate(5), || {
            calls += 1;
            Err(TestErr(false))
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn delay_is_capped() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
        };
        assert_eq!(policy.delay_for(8, &TestErr(true)), Duration::from_secs(5));
    }

    #[test]
    fn max_elapsed_adds_attempts_and_waits() {
        // 4 attempts of 20s plus waits of 2s, 4s and 8s
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_elapsed(Duration::from_secs(20)), Duration::from_secs(94));
        assert_eq!(
            RetryPolicy::immediate(2).max_elapsed(Duration::from_secs(20)),
            Duration::from_secs(60)
        );
        let capped = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
        };
        // waits of 2s, 4s, then 5s three times
        assert_eq!(capped.max_elapsed(Duration::ZERO), Duration::from_secs(21));
    }
}
