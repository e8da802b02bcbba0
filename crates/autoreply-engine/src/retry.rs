//! Retry policy for response dispatch
//!
//! Exponential backoff with jitter, capped at a maximum delay.

use autoreply_core::DispatchConfig;
use rand::Rng;
use std::time::Duration;

/// Retry policy passed to the dispatcher
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub base_delay: Duration,
    /// Maximum delay between attempts
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
    /// Jitter factor (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with the given attempt ceiling
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Default::default()
        }
    }

    /// Build from dispatch configuration
    pub fn from_config(config: &DispatchConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            multiplier: 2.0,
            jitter_factor: config.jitter_factor.clamp(0.0, 1.0),
        }
    }

    /// Set base delay
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set max delay
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set jitter factor
    pub fn with_jitter_factor(mut self, factor: f64) -> Self {
        self.jitter_factor = factor.clamp(0.0, 1.0);
        self
    }

    /// Delay to wait after the given failed attempt (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let delay = self
            .base_delay
            .mul_f64(self.multiplier.powi((attempt - 1) as i32))
            .min(self.max_delay);

        self.add_jitter(delay).min(self.max_delay)
    }

    fn add_jitter(&self, delay: Duration) -> Duration {
        let range = delay.mul_f64(self.jitter_factor);
        if range.is_zero() {
            return delay;
        }

        let mut rng = rand::thread_rng();
        let jitter = rng.gen_range(Duration::ZERO..range);
        if rng.gen_bool(0.5) {
            delay + jitter
        } else {
            delay.saturating_sub(jitter)
        }
    }

    /// Whether another attempt is allowed after `attempt` attempts
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}
