use std::time::Duration;
use thiserror::Error;

/// Outcome reported by a single call to an external dependency.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DependencyError {
    /// The call exceeded the per-call deadline.
    #[error("call timed out after {0:?}")]
    Timeout(Duration),
    /// The dependency could not be reached.
    #[error("connection failure: {0}")]
    Connection(String),
    /// The dependency answered with a status code.
    #[error("dependency returned status {code}: {message}")]
    Status { code: u16, message: String },
    /// A well-formed "does not exist" answer.
    #[error("not found: {0}")]
    NotFound(String),
    /// Anything else; classified by message.
    #[error("{0}")]
    Other(String),
}

impl DependencyError {
    pub fn status(code: u16, message: impl Into<String>) -> Self {
        DependencyError::Status {
            code,
            message: message.into(),
        }
    }
}

/// Errors surfaced by [`ResilientClient`](crate::ResilientClient).
///
/// `CircuitOpen` and `RetryExhausted` both mean the dependency is unavailable;
/// use [`is_unavailable`](Self::is_unavailable) to branch into degraded mode.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResilienceError {
    #[error("circuit open for dependency '{dependency}'")]
    CircuitOpen { dependency: String },
    #[error("dependency '{dependency}' still failing after {attempts} attempts: {last}")]
    RetryExhausted {
        dependency: String,
        attempts: u32,
        last: DependencyError,
    },
    /// Returned as-is without retrying (e.g. not found, client errors).
    #[error("dependency '{dependency}' rejected the call: {source}")]
    NonRetryable {
        dependency: String,
        #[source]
        source: DependencyError,
    },
    #[error("invalid resilience config: {0}")]
    InvalidConfig(String),
}

impl ResilienceError {
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            ResilienceError::CircuitOpen { .. } | ResilienceError::RetryExhausted { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ResilienceError::NonRetryable {
                source: DependencyError::NotFound(_),
                ..
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_covers_open_and_exhausted() {
        let open = ResilienceError::CircuitOpen {
            dependency: "store".into(),
        };
        let exhausted = ResilienceError::RetryExhausted {
            dependency: "store".into(),
            attempts: 3,
            last: DependencyError::Timeout(Duration::from_millis(10)),
        };
        let missing = ResilienceError::NonRetryable {
            dependency: "store".into(),
            source: DependencyError::NotFound("img-1".into()),
        };

        assert!(open.is_unavailable());
        assert!(exhausted.is_unavailable());
        assert!(!missing.is_unavailable());
        assert!(missing.is_not_found());
    }

    #[test]
    fn messages_name_the_dependency() {
        let err = ResilienceError::RetryExhausted {
            dependency: "embedding-store".into(),
            attempts: 4,
            last: DependencyError::status(503, "busy"),
        };
        let text = err.to_string();
        assert!(text.contains("embedding-store"));
        assert!(text.contains("4 attempts"));
        assert!(text.contains("503"));
    }
}
