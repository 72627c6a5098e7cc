//! Retry policy: exponential backoff for failed extraction jobs.

use std::time::Duration;

use crate::config::WorkerConfig;

/// Retry policy configuration.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, the first one included.
    pub max_attempts: u32,
    /// Delay before the second attempt in milliseconds.
    pub base_delay_ms: u64,
    /// Multiplier for each subsequent wait.
    pub backoff_factor: f64,
    /// Maximum delay cap in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&WorkerConfig::default())
    }
}

impl From<&WorkerConfig> for RetryPolicy {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay_ms: config.base_delay_ms,
            backoff_factor: 2.0,
            max_delay_ms: config.max_delay_ms,
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt_number` (1-indexed).
    pub fn delay_for(&self, attempt_number: u32) -> Duration {
        if attempt_number == 0 {
            return Duration::ZERO;
        }
        let delay_ms =
            self.base_delay_ms as f64 * self.backoff_factor.powi((attempt_number - 1) as i32);
        Duration::from_millis(delay_ms.min(self.max_delay_ms as f64) as u64)
    }

    /// Whether another attempt is allowed after `attempt_number` attempts.
    pub fn should_retry(&self, attempt_number: u32) -> bool {
        attempt_number < self.max_attempts
    }
}
