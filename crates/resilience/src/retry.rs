//! Retry policy with capped exponential backoff.
//!
//! `delay(attempt) = min(base_delay * backoff_multiplier^attempt, max_delay)`,
//! where `attempt` is 0 for the first retry.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::DependencyError;

/// Configuration for retry behavior.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds.
    #[serde(with = "crate::serde_millis")]
    pub base_delay: Duration,
    /// Upper bound on any single delay, in milliseconds.
    #[serde(with = "crate::serde_millis")]
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Add up to 25% random jitter on top of the computed delay.
    pub jitter: bool,
    /// Status codes treated as transient.
    pub retryable_statuses: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            jitter: false,
            retryable_statuses: vec![408, 429, 500, 502, 503, 504],
        }
    }
}

impl RetryConfig {
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_retryable_statuses(mut self, statuses: Vec<u16>) -> Self {
        self.retryable_statuses = statuses;
        self
    }

    /// Delay to wait before retry number `attempt` (0-indexed).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponential =
            self.base_delay.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);
        let capped = exponential.min(self.max_delay.as_millis() as f64).max(0.0) as u64;

        if self.jitter {
            let jitter_range = capped / 4;
            if jitter_range > 0 {
                return Duration::from_millis(capped + fastrand::u64(0..=jitter_range));
            }
        }

        Duration::from_millis(capped)
    }

    /// Whether a failed attempt is worth repeating.
    pub fn is_retryable(&self, error: &DependencyError) -> bool {
        match error {
            DependencyError::Timeout(_) | DependencyError::Connection(_) => true,
            DependencyError::Status { code, .. } => self.retryable_statuses.contains(code),
            DependencyError::NotFound(_) => false,
            DependencyError::Other(message) => is_retryable_message(message),
        }
    }

    pub fn validate(&self) -> Result<(), crate::ResilienceError> {
        if !(self.backoff_multiplier.is_finite() && self.backoff_multiplier >= 1.0) {
            return Err(crate::ResilienceError::InvalidConfig(
                "retry.backoff_multiplier must be >= 1.0".into(),
            ));
        }
        if self.max_delay < self.base_delay {
            return Err(crate::ResilienceError::InvalidConfig(
                "retry.max_delay must be >= retry.base_delay".into(),
            ));
        }
        Ok(())
    }
}

/// Classify a free-form error message as transient or not.
///
/// Unknown messages default to retryable.
pub fn is_retryable_message(error: &str) -> bool {
    let error_lower = error.to_lowercase();

    if error_lower.contains("timeout")
        || error_lower.contains("timed out")
        || error_lower.contains("connection")
        || error_lower.contains("reset")
        || error_lower.contains("temporarily")
        || error_lower.contains("unavailable")
        || error_lower.contains("throttl")
    {
        return true;
    }

    if error_lower.contains("invalid")
        || error_lower.contains("not found")
        || error_lower.contains("forbidden")
        || error_lower.contains("unauthorized")
        || error_lower.contains("malformed")
    {
        return false;
    }

    true
}
