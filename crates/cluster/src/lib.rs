//! # Product grouping (`cluster`)
//!
//! Pure, single-threaded partitioning of a set of images into product groups
//! given a complete matrix of pairwise scores, plus the editing operations
//! applied to groups afterwards.
//!
//! [`ClusterBuilder::build`] works in three passes:
//!
//! 1. **Existing matches.** When enabled, an image whose best match against
//!    previously stored embeddings scores at least `threshold` joins that
//!    stored image's group and takes no part in pass 2.
//! 2. **Complete-link growth.** Candidate pairs scoring at least `threshold`
//!    are visited best first (ties broken by the smaller `(a, b)` id pair).
//!    Each pair with both images still free seeds a group, which then grows
//!    by the free image whose *lowest* score against every member is highest
//!    and still at least `threshold`, up to `max_group_size`.
//! 3. **Leftovers.** Groups below `min_group_size` are dissolved. Remaining
//!    images become single-image groups when `min_group_size == 1`, and are
//!    reported as ungrouped otherwise.
//!
//! No I/O happens here; the same inputs always yield the same partition.
//!
//! [`GroupManager`] owns a result's groups and ungrouped pool and applies
//! split, merge, remove and manual-create edits while keeping every image in
//! at most one group.

mod builder;
mod config;
mod error;
mod manager;
mod matrix;
mod types;

pub use crate::builder::ClusterBuilder;
pub use crate::config::ClusterConfig;
pub use crate::error::{ClusterError, GroupError};
pub use crate::manager::GroupManager;
pub use crate::matrix::ScoreMatrix;
pub use crate::types::{
    Diagnostic, ExistingMatch, ExistingMatches, GroupMetadata, GroupType, GroupingResult,
    ProductGroup,
};
