//! Delay between connection creation retries

use std::time::Duration;

/// Delay policy between connection creation attempts: the same
/// `acquireRetryDelayInMs` before every retry.
///
/// # Example
///
/// ```
/// use dbcp_pool::retry::BackoffStrategy;
/// use std::time::Duration;
///
/// let backoff = BackoffStrategy::constant(250);
/// assert_eq!(backoff.calculate_delay(5), Duration::from_millis(250));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffStrategy {
    delay_ms: u64,
}

impl BackoffStrategy {
    pub fn constant(delay_ms: u64) -> Self {
        Self { delay_ms }
    }

    /// Delay before retry number `attempt` (0 = first retry)
    pub fn calculate_delay(&self, _attempt: u32) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl Default for BackoffStrategy {
    /// One second between attempts
    fn default() -> Self {
        Self::constant(1000)
    }
}
