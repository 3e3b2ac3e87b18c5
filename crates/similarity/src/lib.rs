//! # Similarity (`similarity`)
//!
//! Scores how likely two images show the same physical product.
//!
//! Five independent signals are computed per pair, each a pure function of
//! the two images' [`ImageFeatures`] returning a value in [0, 1], or nothing
//! when the inputs it needs are missing:
//!
//! | Signal        | Inputs                         | Measure                                  |
//! |---------------|--------------------------------|------------------------------------------|
//! | `spatial`     | embedding                      | cosine of block-mean-pooled vectors      |
//! | `feature`     | embedding                      | cosine of the full vectors               |
//! | `semantic`    | `labels` metadata              | Jaccard overlap of label sets            |
//! | `composition` | `width`/`height` metadata      | aspect ratio and resolution agreement    |
//! | `background`  | `background` metadata          | Jaccard overlap of background colours    |
//!
//! [`SimilarityAggregator`] folds them into one overall score with validated
//! [`SignalWeights`]. Missing signals are handled by one
//! [`MissingSignalPolicy`] for every pair.

mod aggregator;
mod error;
mod features;
pub mod signals;
mod tier;
mod types;

pub use crate::aggregator::{MissingSignalPolicy, SimilarityAggregator};
pub use crate::error::SignalError;
pub use crate::features::ImageFeatures;
pub use crate::tier::MatchTier;
pub use crate::types::{SignalKind, SignalScores, SignalWeights, SimilarityScore, WEIGHT_SUM_EPSILON};
