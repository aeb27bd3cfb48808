//! Reconnect delay schedule
//!
//! Attempt `n` (1-based) waits `min(base^n, cap)` time units. Once
//! `max_attempts` have failed the delay is pinned to a slow retry interval;
//! the link keeps trying for as long as the process runs.

use std::time::Duration;

/// Backoff tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Length of one time unit
    pub unit: Duration,
    /// Exponential base
    pub base: u32,
    /// Upper bound on the escalating delay, in units
    pub cap_units: u32,
    /// Attempts that escalate before switching to the slow retry
    pub max_attempts: u32,
    /// Delay used after `max_attempts`, in units
    pub slow_retry_units: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            unit: Duration::from_secs(1),
            base: 2,
            cap_units: 30,
            max_attempts: 10,
            slow_retry_units: 10,
        }
    }
}

/// Attempt counter with its delay schedule
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
}

impl Backoff {
    /// Create a backoff with no failed attempts
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Count a new attempt and return how long to wait after it fails
    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        self.delay_for(self.attempt)
    }

    /// Delay after the given 1-based attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let units = if attempt > self.config.max_attempts {
            self.config.slow_retry_units
        } else {
            self.config
                .base
                .checked_pow(attempt)
                .unwrap_or(u32::MAX)
                .min(self.config.cap_units)
        };
        self.config.unit.saturating_mul(units)
    }

    /// Attempts since the last reset
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Start over after a successful open
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}
