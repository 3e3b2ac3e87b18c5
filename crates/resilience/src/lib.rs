//! Resilience layer for the product grouping engine.
//!
//! Calls to the embedding store go through a [`ResilientClient`], which wraps
//! each attempt in a hard timeout, retries transient failures with capped
//! exponential backoff, and consults a shared [`CircuitBreaker`] before every
//! attempt. When the breaker is open the call fails fast with
//! [`ResilienceError::CircuitOpen`] and no retry budget is spent.
//!
//! Breakers are plain values. Build one per dependency at process start
//! (directly or through [`CircuitBreakerManager`]) and hand the `Arc` to every
//! client that talks to that dependency.
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use resilience::{CircuitBreaker, CircuitBreakerConfig, ResilientClient, RetryConfig};
//!
//! let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default()));
//! let client = ResilientClient::new("embedding-store", breaker)
//!     .with_retry(RetryConfig::default().with_max_retries(2))
//!     .with_call_timeout(Duration::from_secs(5));
//! assert_eq!(client.dependency(), "embedding-store");
//! ```

pub mod circuit_breaker;
pub mod client;
pub mod error;
pub mod retry;
pub mod serde_millis;

pub use crate::circuit_breaker::{
    Admission, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerManager, CircuitBreakerStats, CircuitState,
};
pub use crate::client::ResilientClient;
pub use crate::error::{DependencyError, ResilienceError};
pub use crate::retry::{is_retryable_message, RetryConfig};
