use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry policy for idempotent writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Additional attempts after the first one.
    #[serde(default)]
    pub max_retries: u32,
    /// Pause before the first retry. Zero retries immediately.
    #[serde(default)]
    pub initial_backoff_ms: u64,
    /// Exponential multiplier per retry step.
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    /// Upper bound for computed backoff.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

const fn default_backoff_factor() -> f64 {
    2.0
}

const fn default_max_backoff_ms() -> u64 {
    30_000
}

impl Default for RetryPolicy {
    /// Two attempts, no pause between them.
    fn default() -> Self {
        Self::attempts(2)
    }
}

impl RetryPolicy {
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            initial_backoff_ms: 0,
            backoff_factor: default_backoff_factor(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }

    /// `total` attempts in a row without backoff. Zero is treated as one.
    pub const fn attempts(total: u32) -> Self {
        let mut policy = Self::none();
        policy.max_retries = total.saturating_sub(1);
        policy
    }

    /// Pause `initial_backoff_ms` before the first retry, growing by `backoff_factor` per retry.
    pub fn with_backoff_ms(mut self, initial_backoff_ms: u64) -> Self {
        self.initial_backoff_ms = initial_backoff_ms;
        self
    }

    /// Total number of attempts, including the first.
    pub fn total_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    pub fn can_retry(&self, retries_done: u32) -> bool {
        retries_done < self.max_retries
    }

    pub fn backoff_duration(&self, retries_done: u32) -> Duration {
        if self.max_retries == 0 || self.initial_backoff_ms == 0 {
            return Duration::ZERO;
        }
        let exp = self.backoff_factor.powi(retries_done as i32);
        let base = (self.initial_backoff_ms as f64 * exp).round() as u64;
        let clamped = base.min(self.max_backoff_ms.max(1));
        Duration::from_millis(clamped)
    }
}
