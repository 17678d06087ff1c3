//! Exponential backoff for transient API failures.

use std::time::Duration;

use domainop_core::RetryConfig;
use domainop_fiber::FiberConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    initial_delay: Duration,
    max_delay: Duration,
    max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(initial_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            initial_delay,
            max_delay: max_delay.max(initial_delay),
            max_attempts,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            Duration::from_millis(config.initial_delay_ms),
            Duration::from_millis(config.max_delay_ms),
            config.max_attempts,
        )
    }

    /// Delay before retry number `attempt` (1-based): the initial delay
    /// doubled per previous attempt, capped at the maximum.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial_delay
            .checked_mul(1u32 << exponent)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// Consecutive retries one call or listing may make before it gives up.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Engine settings bounding consecutive retries by this policy.
    pub fn fiber_config(&self) -> FiberConfig {
        FiberConfig {
            max_retries: self.max_attempts,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
