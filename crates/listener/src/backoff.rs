//! Caller-owned reconnect schedule.
//!
//! The subscription manager never retries by itself. Code that wants
//! automatic recovery asks a [`ReconnectBackoff`] how long to wait before the
//! next [`reconnect`](crate::ChannelSubscriptionManager::reconnect) and stops
//! once the attempt budget is spent.

use std::time::Duration;

use crate::config::BackoffConfig;

/// Bounded exponential back-off.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    config: BackoffConfig,
    attempt: u32,
}

impl ReconnectBackoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Delay before the next attempt, or `None` once `max_attempts` delays
    /// have been handed out.
    ///
    /// Delays grow as `initial * multiplier^n` and are capped at `max`.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.config.max_attempts {
            return None;
        }
        let factor = self.config.multiplier.powi(self.attempt as i32);
        let millis = (self.config.initial_delay_ms as f64 * factor)
            .min(self.config.max_delay_ms as f64);
        self.attempt += 1;
        Some(Duration::from_millis(millis as u64))
    }

    /// Starts the schedule over, e.g. after a successful join.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Attempts handed out since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}
