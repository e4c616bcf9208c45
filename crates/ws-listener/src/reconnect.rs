//! Bounded exponential backoff for reconnect attempts.

use std::time::Duration;

use crate::types::ReconnectConfig;

/// What to do after a failed or closed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Try again after `delay`. `attempt` is 1-based.
    Retry { attempt: u32, delay: Duration },
    /// `attempts` consecutive retries have failed; stop.
    GiveUp { attempts: u32 },
}

/// Tracks consecutive failures and yields `min(base * 2^attempt, max)`.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempt: u32,
}

impl ReconnectPolicy {
    pub fn new(config: ReconnectConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Retries scheduled since the last successful connection.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.config.max_attempts
    }

    /// Backoff for a given 0-based attempt count.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        // 2^31 already dwarfs any sane cap; clamp the shift to avoid overflow.
        let factor = 1u32 << attempt.min(31);
        self.config
            .base_delay
            .saturating_mul(factor)
            .min(self.config.max_delay)
    }

    /// Decide the next step and, on retry, count the attempt.
    pub fn on_failure(&mut self) -> Decision {
        if self.is_exhausted() {
            return Decision::GiveUp {
                attempts: self.attempt,
            };
        }
        let delay = self.delay_for(self.attempt);
        self.attempt += 1;
        Decision::Retry {
            attempt: self.attempt,
            delay,
        }
    }

    /// Forget past failures after a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
