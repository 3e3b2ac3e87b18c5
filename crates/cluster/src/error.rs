use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClusterError {
    #[error("invalid cluster config: {0}")]
    InvalidConfig(String),
}

/// Errors from [`GroupManager`](crate::GroupManager) edits.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GroupError {
    #[error("group '{0}' not found")]
    NotFound(String),
    #[error("merging needs at least 2 distinct groups, got {0}")]
    InsufficientGroups(usize),
    #[error("image '{image_id}' is not in group '{group_id}'")]
    ImageNotInGroup { group_id: String, image_id: String },
    #[error("a group needs at least one image")]
    EmptyGroup,
}
