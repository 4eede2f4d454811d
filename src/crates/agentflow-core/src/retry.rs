//! Retry policy with exponential backoff
//!
//! Applied by the runner when the middleware chain answers a node failure
//! with a retry decision. Only transient errors are ever retried (see
//! [`FlowError::is_transient`](crate::error::FlowError::is_transient)).
//! Defaults: 3 attempts, 100 ms base, 5 s cap, factor 2, jitter on.

use rand::Rng;
use std::time::Duration;

/// Backoff configuration for retried node invocations
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempt budget, including the first attempt
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    /// Adds up to +25% random delay to spread synchronized retries
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 5_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// No retries at all.
    pub fn none() -> Self {
        Self::new(1)
    }

    pub fn with_initial_backoff(mut self, ms: u64) -> Self {
        self.initial_backoff_ms = ms;
        self
    }

    pub fn with_max_backoff(mut self, ms: u64) -> Self {
        self.max_backoff_ms = ms;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Whether another attempt is allowed after `attempt` (0-based) failed.
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt + 1 < self.max_attempts
    }

    /// Delay before re-running after `attempt` (0-based) failed.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        let capped = base.min(self.max_backoff_ms as f64) as u64;
        let delayed = if self.jitter {
            let jitter = (capped as f64 * 0.25 * rand::thread_rng().gen::<f64>()) as u64;
            capped + jitter
        } else {
            capped
        };
        Duration::from_millis(delayed.min(self.max_backoff_ms))
    }
}
