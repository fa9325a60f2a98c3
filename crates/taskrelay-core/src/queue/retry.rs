//! Retry policy: decides backoff delays.

use std::time::Duration;

/// Retry policy for failed deliveries.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,
}

impl RetryPolicy {
    pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(10);

    pub fn exponential(base_delay: Duration) -> Self {
        Self {
            base_delay,
            multiplier: 2.0,
        }
    }

    /// Delay before the next attempt.
    ///
    /// `retried` is the zero-based retry count (retries already consumed):
    /// delay = base_delay * multiplier^retried
    ///
    /// With the default 10s base:
    /// - first retry: 10s
    /// - second retry: 20s
    /// - third retry: 40s
    pub fn next_delay(&self, retried: u32) -> Duration {
        let exponent = i32::try_from(retried).unwrap_or(i32::MAX);
        let delay_secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::try_from_secs_f64(delay_secs).unwrap_or(Duration::MAX)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(Self::DEFAULT_BASE_DELAY)
    }
}
