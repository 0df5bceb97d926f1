//! Retry policy for the primary provider
//!
//! The dispatcher owns the attempt loop; this module only answers "may I try
//! again?" and "how long do I wait first?".

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{ErrorKind, LlmError};

/// Delay growth between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    /// `initial_delay * (attempt + 1)`
    #[default]
    Linear,
    /// `initial_delay * multiplier^attempt`
    Exponential,
}

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts against the primary provider (at least one)
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff: Backoff,
    /// Used by [`Backoff::Exponential`]
    pub backoff_multiplier: f64,
    pub use_jitter: bool,
    /// Maximum jitter as a fraction of the delay (0.0 to 1.0)
    pub jitter_factor: f64,
    /// Skip the remaining retries after an authentication failure
    pub fail_fast_on_auth: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff: Backoff::Linear,
            backoff_multiplier: 2.0,
            use_jitter: true,
            jitter_factor: 0.1,
            fail_fast_on_auth: false,
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// A policy that never retries and never sleeps.
    pub fn none() -> Self {
        Self::default()
            .with_max_attempts(1)
            .with_initial_delay(Duration::ZERO)
            .with_jitter(false)
    }

    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub const fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub const fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub const fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub const fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub const fn with_jitter(mut self, use_jitter: bool) -> Self {
        self.use_jitter = use_jitter;
        self
    }

    pub fn with_jitter_factor(mut self, factor: f64) -> Self {
        self.jitter_factor = factor.clamp(0.0, 1.0);
        self
    }

    pub const fn with_fail_fast_on_auth(mut self, fail_fast: bool) -> Self {
        self.fail_fast_on_auth = fail_fast;
        self
    }

    /// Effective attempt ceiling.
    pub fn attempt_ceiling(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Whether `error`, raised by 0-based `attempt`, may be retried on the
    /// same provider.
    pub fn should_retry(&self, error: &LlmError, attempt: u32) -> bool {
        if attempt + 1 >= self.attempt_ceiling() {
            return false;
        }
        if self.fail_fast_on_auth && error.kind() == ErrorKind::Authentication {
            return false;
        }
        error.is_retryable()
    }

    /// Delay to wait after 0-based `attempt` failed.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let initial = self.initial_delay.as_millis() as f64;
        let base = match self.backoff {
            Backoff::Linear => initial * f64::from(attempt + 1),
            Backoff::Exponential => initial * self.backoff_multiplier.powi(attempt as i32),
        };
        let delay = Duration::from_millis(base as u64).min(self.max_delay);

        if self.use_jitter {
            self.add_jitter(delay)
        } else {
            delay
        }
    }

    fn add_jitter(&self, delay: Duration) -> Duration {
        let jitter_range = delay.as_millis() as f64 * self.jitter_factor;
        if jitter_range <= 0.0 {
            return delay;
        }
        let jitter = rand::thread_rng().gen_range(-jitter_range..=jitter_range);
        let new_delay = delay.as_millis() as f64 + jitter;
        Duration::from_millis(new_delay.max(0.0) as u64)
    }
}
