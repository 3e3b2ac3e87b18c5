use batch::BatchError;
use cluster::{ClusterError, GroupError};
use embedding::EmbeddingError;
use resilience::ResilienceError;
use similarity::SignalError;
use thiserror::Error;

/// Errors that fail a grouping call.
///
/// Per-image problems never show up here; they are reported through
/// `GroupingResult::diagnostics`. What remains is configuration and request
/// validation, plus dependency failures on paths that cannot degrade.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GroupingError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("invalid tenant id: {0}")]
    InvalidTenant(String),
    #[error(transparent)]
    Signal(#[from] SignalError),
    #[error(transparent)]
    Cluster(#[from] ClusterError),
    #[error(transparent)]
    Group(#[from] GroupError),
    #[error(transparent)]
    Batch(#[from] BatchError),
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error(transparent)]
    Resilience(#[from] ResilienceError),
}

impl GroupingError {
    /// True when the call was refused because of its input or configuration.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            GroupingError::Validation(_)
                | GroupingError::InvalidTenant(_)
                | GroupingError::Signal(SignalError::InvalidWeights(_))
                | GroupingError::Cluster(ClusterError::InvalidConfig(_))
                | GroupingError::Batch(BatchError::InvalidConfig(_))
                | GroupingError::Embedding(EmbeddingError::InvalidConfig(_))
                | GroupingError::Resilience(ResilienceError::InvalidConfig(_))
        )
    }

    /// True when the embedding store could not be reached.
    pub fn is_dependency_unavailable(&self) -> bool {
        match self {
            GroupingError::Resilience(err) => err.is_unavailable(),
            GroupingError::Embedding(EmbeddingError::Dependency(err)) => err.is_unavailable(),
            _ => false,
        }
    }
}
