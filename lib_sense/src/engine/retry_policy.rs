//! Fixed-delay retry policy with optional jitter.

use std::time::Duration;

use rand::Rng;

/// How long to wait between attempts of an operation that must eventually succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Base wait between two attempts.
    pub delay: Duration,
    /// Upper bound of a uniformly random extra wait added to `delay`.
    pub jitter: Duration,
}

impl RetryPolicy {
    pub const fn fixed(delay: Duration) -> Self {
        Self { delay, jitter: Duration::ZERO }
    }

    pub const fn with_jitter(delay: Duration, jitter: Duration) -> Self {
        Self { delay, jitter }
    }

    /// The wait to apply before the next attempt.
    pub fn next_delay(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.delay;
        }
        let extra_ms = rand::rng().random_range(0..=self.jitter.as_millis() as u64);
        self.delay + Duration::from_millis(extra_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(60))
    }
}
