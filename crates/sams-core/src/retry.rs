//! Bounded retry with exponential backoff

use std::fmt::Display;
use std::time::Duration;

/// Default number of attempts for a single page / batch operation
pub const ERRMAX: u32 = 3;

/// How many times to try an operation, and how long to wait between tries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Wait after the first failure; doubles after each subsequent one
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// No sleeping between attempts (tests, local stores)
    pub const fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO)
    }

    /// Exponential backoff after `attempt` failures: base, 2*base, 4*base, ...
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(ERRMAX, Duration::from_secs(1))
    }
}

/// Retry a fallible operation with exponential backoff.
///
/// `attempt_fn` receives the 1-based attempt number. Retryable errors are logged
/// and retried until `max_attempts` is reached; the final error is returned.
/// Non-retryable errors are returned immediately.
pub fn retry_with_backoff<T, E: Display>(
    label: &str,
    policy: &RetryPolicy,
    is_retryable: impl Fn(&E) -> bool,
    mut attempt_fn: impl FnMut(u32) -> Result<T, E>,
) -> Result<T, E> {
    let max = policy.max_attempts.max(1);
    let mut attempt = 1u32;
    loop {
        match attempt_fn(attempt) {
            Ok(v) => return Ok(v),
            Err(e) if attempt < max && is_retryable(&e) => {
                let delay = policy.backoff(attempt);
                log::warn!("{label}: attempt {attempt}/{max} failed: {e}, retrying in {delay:?}");
                if !delay.is_zero() {
                    std::thread::sleep(delay);
                }
                attempt += 1;
            }
            Err(e) => {
                log::debug!("{label}: giving up after attempt {attempt}/{max}: {e}");
                return Err(e);
            }
        }
    }
}
