//! Bounded retry with a fixed inter-attempt delay.
//!
//! Every blocking call to the legacy index, the destination index, and the
//! record service goes through [`RetryPolicy::run`].

use std::time::Duration;

use ferry_types::error::MigrationError;

use crate::errors::retry_delay;

const DEFAULT_MAX_ATTEMPTS: u32 = 10;
const DEFAULT_DELAY: Duration = Duration::from_secs(5);

/// Fixed-budget retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Values below 1 act as 1.
    pub max_attempts: u32,
    /// Pause between attempts unless the error carries its own hint.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: DEFAULT_DELAY,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent.
    ///
    /// On exhaustion the last error is returned once, marked
    /// [`exhausted`](MigrationError::exhausted).
    ///
    /// # Errors
    ///
    /// Returns the first non-retryable error, or the last retryable error
    /// after `max_attempts` failures.
    pub fn run<T, F>(&self, operation: &str, mut op: F) -> Result<T, MigrationError>
    where
        F: FnMut() -> Result<T, MigrationError>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match op() {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(operation, attempt, "Recovered after retry");
                    }
                    return Ok(value);
                }
                Err(err) if err.retryable && attempt < max_attempts => {
                    let delay = retry_delay(&err, self.delay);
                    #[allow(clippy::cast_possible_truncation)]
                    let delay_ms = delay.as_millis() as u64;
                    tracing::warn!(
                        operation,
                        attempt,
                        max_attempts,
                        delay_ms,
                        category = %err.category,
                        code = %err.code,
                        "Transient failure, will retry"
                    );
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                }
                Err(err) if err.retryable => {
                    tracing::error!(
                        operation,
                        attempt,
                        category = %err.category,
                        code = %err.code,
                        "Max retries exhausted"
                    );
                    return Err(err.exhausted(attempt));
                }
                Err(err) => return Err(err),
            }
        }
    }
}
