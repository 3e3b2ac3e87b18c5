use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SignalError {
    #[error("invalid signal weights: {0}")]
    InvalidWeights(String),
    #[error("cannot score image '{0}' against itself")]
    SelfPair(String),
}
