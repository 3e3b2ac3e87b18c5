//! Circuit breaker guarding one external dependency.
//!
//! Stops calling a failing dependency once `failure_threshold` consecutive
//! failures have been recorded, then admits a single trial call after
//! `reset_timeout` to find out whether it recovered.
//!
//! ```text
//! Closed --(failures >= failure_threshold)--> Open
//! Open --(reset_timeout elapsed, checked in can_execute)--> HalfOpen
//! HalfOpen --(successes >= success_threshold)--> Closed
//! HalfOpen --(any failure)--> Open
//! ```
//!
//! Every counter and the state itself sit behind one mutex, so outcomes
//! recorded concurrently by several workers are applied one at a time.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{info, warn};

use crate::error::ResilienceError;

/// States of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    /// Normal operation - calls allowed.
    Closed,
    /// Failing fast - calls rejected until the reset timeout elapses.
    Open,
    /// Probing recovery - one trial call at a time.
    HalfOpen,
}

/// Outcome of asking a breaker for permission to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Rejected,
    /// Closed circuit.
    Normal,
    /// The single half-open trial.
    Trial,
}

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit.
    pub failure_threshold: u32,
    /// Time to stay open before admitting a trial call, in milliseconds.
    #[serde(with = "crate::serde_millis")]
    pub reset_timeout: Duration,
    /// Consecutive half-open successes required to close the circuit.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
            success_threshold: 2,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    pub fn validate(&self) -> Result<(), ResilienceError> {
        if self.failure_threshold == 0 {
            return Err(ResilienceError::InvalidConfig(
                "circuit_breaker.failure_threshold must be >= 1".into(),
            ));
        }
        if self.success_threshold == 0 {
            return Err(ResilienceError::InvalidConfig(
                "circuit_breaker.success_threshold must be >= 1".into(),
            ));
        }
        Ok(())
    }
}

/// Point-in-time view of a breaker, for observability.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    /// When the circuit last opened; `None` while closed.
    pub opened_at: Option<Instant>,
    pub total_successes: u64,
    pub total_failures: u64,
    /// Calls turned away by an open circuit or a busy half-open trial.
    pub rejected_calls: u64,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
    total_successes: u64,
    total_failures: u64,
    rejected_calls: u64,
}

/// Circuit breaker for a single dependency.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::named("dependency", config)
    }

    /// Breaker whose transitions are logged under `name`.
    pub fn named(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                opened_at: None,
                trial_in_flight: false,
                total_successes: 0,
                total_failures: 0,
                rejected_calls: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Check whether a call may go through right now.
    ///
    /// An open circuit whose reset timeout has elapsed moves to half-open here
    /// and admits exactly one trial; further calls are refused until that trial
    /// is recorded or abandoned.
    pub fn can_execute(&self) -> bool {
        self.admit() != Admission::Rejected
    }

    /// Like [`can_execute`](Self::can_execute), telling a half-open trial
    /// apart from a normal call.
    ///
    /// A caller holding [`Admission::Trial`] must end it with
    /// [`record_success`](Self::record_success),
    /// [`record_failure`](Self::record_failure) or
    /// [`abandon_trial`](Self::abandon_trial); until then the circuit stays
    /// closed to everyone else.
    pub fn admit(&self) -> Admission {
        let mut inner = self.lock();

        match inner.state {
            CircuitState::Closed => Admission::Normal,
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|opened| opened.elapsed() >= self.config.reset_timeout)
                    .unwrap_or(true);
                if elapsed {
                    inner.state = CircuitState::HalfOpen;
                    inner.consecutive_successes = 0;
                    inner.trial_in_flight = true;
                    info!(dependency = %self.name, "circuit_half_open");
                    Admission::Trial
                } else {
                    inner.rejected_calls += 1;
                    Admission::Rejected
                }
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    inner.rejected_calls += 1;
                    Admission::Rejected
                } else {
                    inner.trial_in_flight = true;
                    Admission::Trial
                }
            }
        }
    }

    /// Give up a half-open trial whose outcome will never be known.
    ///
    /// The circuit reopens, so the next trial waits a full reset timeout.
    /// Does nothing unless a trial is in flight.
    pub fn abandon_trial(&self) {
        let mut inner = self.lock();
        if inner.state != CircuitState::HalfOpen || !inner.trial_in_flight {
            return;
        }
        inner.trial_in_flight = false;
        inner.total_failures += 1;
        inner.consecutive_successes = 0;
        inner.state = CircuitState::Open;
        inner.opened_at = Some(Instant::now());
        warn!(dependency = %self.name, "circuit_trial_abandoned");
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut inner = self.lock();
        inner.total_successes += 1;

        match inner.state {
            CircuitState::HalfOpen => {
                inner.trial_in_flight = false;
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.success_threshold.max(1) {
                    inner.state = CircuitState::Closed;
                    inner.consecutive_failures = 0;
                    inner.consecutive_successes = 0;
                    inner.opened_at = None;
                    info!(dependency = %self.name, "circuit_closed");
                }
            }
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
                inner.consecutive_successes = inner.consecutive_successes.saturating_add(1);
            }
            // A call admitted before the circuit tripped finished late.
            CircuitState::Open => {}
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.total_failures += 1;
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.consecutive_successes = 0;

        match inner.state {
            CircuitState::HalfOpen => {
                inner.trial_in_flight = false;
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                warn!(dependency = %self.name, "circuit_reopened");
            }
            CircuitState::Closed => {
                if inner.consecutive_failures >= self.config.failure_threshold.max(1) {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    warn!(
                        dependency = %self.name,
                        consecutive_failures = inner.consecutive_failures,
                        "circuit_opened"
                    );
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Current state. Does not advance an expired open circuit; only
    /// [`can_execute`](Self::can_execute) does that.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let inner = self.lock();
        CircuitBreakerStats {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
            opened_at: inner.opened_at,
            total_successes: inner.total_successes,
            total_failures: inner.total_failures,
            rejected_calls: inner.rejected_calls,
        }
    }
}

/// Registry handing out one breaker per dependency name.
///
/// Construct it once at startup and pass it (or the breakers it yields) to
/// the clients that need them.
#[derive(Debug)]
pub struct CircuitBreakerManager {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    default_config: CircuitBreakerConfig,
}

impl CircuitBreakerManager {
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            default_config,
        }
    }

    /// Get or create the breaker for `dependency` using the default config.
    pub fn get_or_create(&self, dependency: &str) -> Arc<CircuitBreaker> {
        self.get_or_create_with(dependency, self.default_config)
    }

    /// Get or create the breaker for `dependency`; `config` only applies on creation.
    pub fn get_or_create_with(
        &self,
        dependency: &str,
        config: CircuitBreakerConfig,
    ) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(dependency.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::named(dependency, config)))
            .clone()
    }

    pub fn get_state(&self, dependency: &str) -> Option<CircuitState> {
        self.breakers.get(dependency).map(|b| b.state())
    }

    /// Unknown dependencies count as healthy.
    pub fn is_healthy(&self, dependency: &str) -> bool {
        self.get_state(dependency)
            .map(|s| s != CircuitState::Open)
            .unwrap_or(true)
    }

    pub fn snapshot(&self) -> Vec<(String, CircuitBreakerStats)> {
        let mut stats: Vec<_> = self
            .breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().stats()))
            .collect();
        stats.sort_by(|a, b| a.0.cmp(&b.0));
        stats
    }
}

impl Default for CircuitBreakerManager {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tripped(threshold: u32, reset: Duration) -> CircuitBreaker {
        let cb = CircuitBreaker::new(
            CircuitBreakerConfig::default()
                .with_failure_threshold(threshold)
                .with_reset_timeout(reset),
        );
        for _ in 0..threshold {
            assert!(cb.can_execute());
            cb.record_failure();
        }
        cb
    }

    #[test]
    fn starts_closed() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::default());
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.can_execute());
        assert_eq!(cb.stats().opened_at, None);
    }

    #[test]
    fn opens_after_consecutive_failures() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::default().with_failure_threshold(3));

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.can_execute());

        let stats = cb.stats();
        assert_eq!(stats.consecutive_failures, 3);
        assert!(stats.opened_at.is_some());
        assert_eq!(stats.rejected_calls, 1);
    }

    #[test]
    fn success_resets_failure_streak() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::default().with_failure_threshold(3));

        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn stays_open_until_timeout() {
        let cb = tripped(2, Duration::from_secs(3600));
        for _ in 0..5 {
            assert!(!cb.can_execute());
        }
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn half_open_admits_single_trial_then_reopens_on_failure() {
        let cb = tripped(2, Duration::from_millis(0));

        assert!(cb.can_execute());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        // The trial is still outstanding.
        assert!(!cb.can_execute());

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn abandoned_trial_reopens_and_later_admits_again() {
        let cb = tripped(1, Duration::from_millis(20));
        std::thread::sleep(Duration::from_millis(30));

        assert_eq!(cb.admit(), Admission::Trial);
        assert_eq!(cb.admit(), Admission::Rejected);

        cb.abandon_trial();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.can_execute());

        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(cb.admit(), Admission::Trial);
    }

    #[test]
    fn abandon_without_trial_is_ignored() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::default());
        assert_eq!(cb.admit(), Admission::Normal);
        cb.abandon_trial();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.stats().total_failures, 0);
    }

    #[test]
    fn closes_after_success_threshold() {
        let cb = CircuitBreaker::new(
            CircuitBreakerConfig::default()
                .with_failure_threshold(1)
                .with_reset_timeout(Duration::from_millis(0))
                .with_success_threshold(2),
        );

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        assert!(cb.can_execute());
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        assert!(cb.can_execute());
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.stats().consecutive_failures, 0);
        assert_eq!(cb.stats().opened_at, None);
    }

    #[test]
    fn reopens_after_real_delay() {
        let cb = tripped(1, Duration::from_millis(20));
        assert!(!cb.can_execute());

        std::thread::sleep(Duration::from_millis(30));
        assert!(cb.can_execute());
        assert!(!cb.can_execute());
        cb.record_failure();
        assert!(!cb.can_execute());
    }

    #[test]
    fn concurrent_failures_are_serialized() {
        let cb = Arc::new(CircuitBreaker::new(
            CircuitBreakerConfig::default().with_failure_threshold(1000),
        ));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cb = Arc::clone(&cb);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        cb.record_failure();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let stats = cb.stats();
        assert_eq!(stats.total_failures, 800);
        assert_eq!(stats.consecutive_failures, 800);
        assert_eq!(stats.state, CircuitState::Closed);
    }

    #[test]
    fn config_validation_rejects_zero_thresholds() {
        assert!(CircuitBreakerConfig::default().validate().is_ok());
        assert!(CircuitBreakerConfig::default()
            .with_failure_threshold(0)
            .validate()
            .is_err());
        assert!(CircuitBreakerConfig::default()
            .with_success_threshold(0)
            .validate()
            .is_err());
    }

    #[test]
    fn config_serde_uses_millis() {
        let cfg = CircuitBreakerConfig::default().with_reset_timeout(Duration::from_millis(250));
        let json = serde_json::to_value(cfg).unwrap();
        assert_eq!(json["reset_timeout"], 250);

        let parsed: CircuitBreakerConfig =
            serde_json::from_str(r#"{"failure_threshold": 2}"#).unwrap();
        assert_eq!(parsed.failure_threshold, 2);
        assert_eq!(parsed.reset_timeout, Duration::from_secs(60));
    }

    #[test]
    fn state_serializes_kebab_case() {
        let json = serde_json::to_string(&CircuitState::HalfOpen).unwrap();
        assert_eq!(json, "\"half-open\"");
    }

    #[test]
    fn manager_keeps_one_breaker_per_dependency() {
        let manager = CircuitBreakerManager::new(
            CircuitBreakerConfig::default().with_failure_threshold(2),
        );

        let store = manager.get_or_create("embedding-store");
        let again = manager.get_or_create("embedding-store");
        assert!(Arc::ptr_eq(&store, &again));

        let other = manager.get_or_create("vision");
        store.record_failure();
        store.record_failure();

        assert!(!manager.is_healthy("embedding-store"));
        assert!(manager.is_healthy("vision"));
        assert!(manager.is_healthy("never-seen"));
        assert_eq!(other.state(), CircuitState::Closed);

        let snapshot = manager.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].0, "embedding-store");
        assert_eq!(snapshot[0].1.state, CircuitState::Open);
    }
}
