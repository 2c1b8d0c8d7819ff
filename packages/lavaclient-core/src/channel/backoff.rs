//! Reconnect delay schedule.

use std::time::Duration;

use rand::Rng;

use crate::config::BackoffConfig;

/// Exponential backoff with a cap, jitter and an optional attempt limit.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Consecutive failures recorded since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Records a failure and returns how long to wait before the next
    /// attempt, or `None` once the attempt limit is reached.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self
            .config
            .max_attempts
            .is_some_and(|max| self.attempt >= max)
        {
            return None;
        }
        self.attempt += 1;

        let exponent = i32::try_from(self.attempt - 1).unwrap_or(i32::MAX);
        let base = (self.config.initial_ms as f64 * self.config.multiplier.powi(exponent))
            .min(self.config.max_ms as f64);

        let spread = self.config.jitter;
        let factor = if spread > 0.0 {
            rand::rng().random_range((1.0 - spread)..=(1.0 + spread))
        } else {
            1.0
        };

        let millis = (base * factor).clamp(0.0, self.config.max_ms as f64);
        Some(Duration::from_millis(millis as u64))
    }

    /// Called after a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
