use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::circuit_breaker::{Admission, CircuitBreaker};
use crate::error::{DependencyError, ResilienceError};
use crate::retry::RetryConfig;

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Wraps calls to one named dependency with timeout, retry and circuit breaking.
///
/// Cloning is cheap; clones share the same breaker.
#[derive(Debug, Clone)]
pub struct ResilientClient {
    dependency: String,
    breaker: Arc<CircuitBreaker>,
    retry: RetryConfig,
    call_timeout: Duration,
}

impl ResilientClient {
    pub fn new(dependency: impl Into<String>, breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            dependency: dependency.into(),
            breaker,
            retry: RetryConfig::default(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn dependency(&self) -> &str {
        &self.dependency
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Run `op` until it succeeds, fails permanently, or the retry budget runs out.
    ///
    /// `op` receives the 0-based attempt number. The breaker is consulted before
    /// every attempt; an open breaker ends the call with
    /// [`ResilienceError::CircuitOpen`] without consuming a retry.
    ///
    /// Not-found answers and non-retryable status codes mean the dependency is
    /// healthy, so they count as a success for the breaker.
    ///
    /// Dropping the returned future while it holds the half-open trial
    /// reopens the circuit instead of leaving the trial outstanding.
    pub async fn call<T, F, Fut>(&self, mut op: F) -> Result<T, ResilienceError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, DependencyError>>,
    {
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            let admission = self.breaker.admit();
            if admission == Admission::Rejected {
                warn!(
                    dependency = %self.dependency,
                    attempt,
                    "dependency_circuit_open"
                );
                return Err(ResilienceError::CircuitOpen {
                    dependency: self.dependency.clone(),
                });
            }

            let mut trial = TrialGuard {
                breaker: self.breaker.as_ref(),
                armed: admission == Admission::Trial,
            };
            let outcome = match tokio::time::timeout(self.call_timeout, op(attempt)).await {
                Ok(result) => result,
                Err(_) => Err(DependencyError::Timeout(self.call_timeout)),
            };
            trial.armed = false;

            let error = match outcome {
                Ok(value) => {
                    self.breaker.record_success();
                    debug!(
                        dependency = %self.dependency,
                        attempt,
                        elapsed_micros = started.elapsed().as_micros() as u64,
                        "dependency_call_success"
                    );
                    return Ok(value);
                }
                Err(error) => error,
            };

            if !self.retry.is_retryable(&error) {
                match &error {
                    DependencyError::NotFound(_) | DependencyError::Status { .. } => {
                        self.breaker.record_success()
                    }
                    _ => self.breaker.record_failure(),
                }
                debug!(
                    dependency = %self.dependency,
                    attempt,
                    error = %error,
                    "dependency_call_rejected"
                );
                return Err(ResilienceError::NonRetryable {
                    dependency: self.dependency.clone(),
                    source: error,
                });
            }

            self.breaker.record_failure();

            if attempt >= self.retry.max_retries {
                warn!(
                    dependency = %self.dependency,
                    attempts = attempt + 1,
                    error = %error,
                    elapsed_micros = started.elapsed().as_micros() as u64,
                    "dependency_retry_exhausted"
                );
                return Err(ResilienceError::RetryExhausted {
                    dependency: self.dependency.clone(),
                    attempts: attempt + 1,
                    last: error,
                });
            }

            let delay = self.retry.delay_for(attempt);
            debug!(
                dependency = %self.dependency,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "dependency_retry_scheduled"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// Abandons a half-open trial if the calling future is dropped mid-attempt.
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.abandon_trial();
        }
    }
}
