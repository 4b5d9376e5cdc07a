use std::time::Duration;

use crate::errors::ShardError;

// -----------------------------------------------------------------------------
// ----- RetryPolicy -----------------------------------------------------------

/// Fixed-delay, bounded-attempt retry applied to every individual shard call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    delay: Duration,
    max_attempts: u32,
}

impl RetryPolicy {
    /// `max_attempts` counts the first attempt and is clamped to at least 1.
    pub fn new(delay: Duration, max_attempts: u32) -> Self {
        Self {
            delay,
            max_attempts: max_attempts.max(1),
        }
    }

    /// A single attempt, no retries.
    pub fn once() -> Self {
        Self::new(Duration::ZERO, 1)
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether a call that just failed with `err` on attempt number
    /// `attempts_made` gets another attempt. Calls bound to an open backend
    /// transaction are never retried: the transaction lives on the connection
    /// that failed.
    pub fn should_retry(&self, attempts_made: u32, err: &ShardError, in_transaction: bool) -> bool {
        attempts_made < self.max_attempts && err.is_retryable() && !in_transaction
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(2), 3)
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
