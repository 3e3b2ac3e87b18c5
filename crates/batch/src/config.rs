use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::BatchError;

/// Tuning knobs for [`BatchExecutor`](crate::BatchExecutor).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BatchConfig {
    /// Items processed at the same time. Must be at least 1.
    pub max_concurrency: usize,
    pub enable_retry: bool,
    /// Retries per item after the first attempt.
    pub max_retries: u32,
    pub backoff: RetryBackoff,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 3,
            enable_retry: true,
            max_retries: 2,
            backoff: RetryBackoff::default(),
        }
    }
}

impl BatchConfig {
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn with_retry(mut self, enable_retry: bool) -> Self {
        self.enable_retry = enable_retry;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff(mut self, backoff: RetryBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn validate(&self) -> Result<(), BatchError> {
        if self.max_concurrency == 0 {
            return Err(BatchError::InvalidConfig(
                "max_concurrency must be at least 1".into(),
            ));
        }
        if let Some(max) = self.backoff.max_delay {
            if max < self.backoff.base_delay {
                return Err(BatchError::InvalidConfig(
                    "backoff.max_delay must be >= backoff.base_delay".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Delay before retry `n` (1-based) is `base_delay * 2^n`, optionally capped.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryBackoff {
    #[serde(with = "resilience::serde_millis")]
    pub base_delay: Duration,
    /// `None` leaves the delay uncapped.
    #[serde(with = "resilience::serde_millis::option")]
    pub max_delay: Option<Duration>,
}

impl Default for RetryBackoff {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Some(Duration::from_secs(30)),
        }
    }
}

impl RetryBackoff {
    pub fn uncapped(base_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay: None,
        }
    }

    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.checked_pow(retry).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        match self.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        }
    }
}
