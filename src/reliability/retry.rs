use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStrategy {
    LinearBackoff,
    FixedDelay,
}

/// Delay schedule between delivery attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub strategy: RetryStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            strategy: RetryStrategy::LinearBackoff,
        }
    }
}

impl RetryPolicy {
    /// `base * n` after the n-th failed attempt.
    pub fn linear(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            strategy: RetryStrategy::LinearBackoff,
            ..Self::default()
        }
    }

    /// `base` after every failed attempt.
    pub fn fixed(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            strategy: RetryStrategy::FixedDelay,
            ..Self::default()
        }
    }

    /// Total attempts including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay to wait after the given 1-based failed attempt.
    pub fn delay_for(&self, failed_attempt: u32) -> Duration {
        let attempt = failed_attempt.max(1);
        let delay = match self.strategy {
            RetryStrategy::LinearBackoff => self.base_delay.saturating_mul(attempt),
            RetryStrategy::FixedDelay => self.base_delay,
        };
        delay.min(self.max_delay)
    }
}
