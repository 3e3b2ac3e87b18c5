use resilience::ResilienceError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EmbeddingError {
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    Dimension { expected: usize, actual: usize },
    #[error("image content is empty")]
    EmptyContent,
    #[error("embedding provider failed: {0}")]
    Provider(String),
    #[error("invalid repository config: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Dependency(#[from] ResilienceError),
}
