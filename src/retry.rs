//! Retry budget and delay schedule.

use std::time::Duration;

/// How many times to try something and how long to wait in between.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay after the first failure.
    pub base_delay: Duration,
    /// Growth factor per further failure. 1.0 means a fixed delay.
    pub backoff_multiplier: f64,
    /// Number of failures logged at warn level before dropping to debug.
    pub warn_threshold: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            backoff_multiplier: 1.0,
            warn_threshold: 1,
        }
    }
}

impl RetryPolicy {
    /// Fixed-delay policy.
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            ..Self::default()
        }
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = if multiplier.is_finite() {
            multiplier.max(1.0)
        } else {
            1.0
        };
        self
    }

    pub fn with_warn_threshold(mut self, threshold: u32) -> Self {
        self.warn_threshold = threshold;
        self
    }

    /// Attempts allowed, never fewer than one.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay to wait after the `failures`-th failed attempt (1-based).
    pub fn delay_after(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(failures - 1).unwrap_or(i32::MAX);
        let factor = self.backoff_multiplier.max(1.0).powi(exponent);
        Duration::try_from_secs_f64(self.base_delay.as_secs_f64() * factor)
            .unwrap_or(Duration::MAX)
    }

    /// Whether the `attempt`-th failure should be logged at warn level.
    pub fn should_warn(&self, attempt: u32) -> bool {
        attempt <= self.warn_threshold
    }
}
