use serde::{Deserialize, Serialize};

/// Confidence band for a match between two images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchTier {
    Different,
    PossiblySame,
    LikelySame,
    SameProduct,
}

impl MatchTier {
    pub const SAME_PRODUCT: f64 = 0.92;
    pub const LIKELY_SAME: f64 = 0.85;
    pub const POSSIBLY_SAME: f64 = 0.75;

    pub fn classify(score: f64) -> Self {
        if score >= Self::SAME_PRODUCT {
            MatchTier::SameProduct
        } else if score >= Self::LIKELY_SAME {
            MatchTier::LikelySame
        } else if score >= Self::POSSIBLY_SAME {
            MatchTier::PossiblySame
        } else {
            MatchTier::Different
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MatchTier::Different => "different",
            MatchTier::PossiblySame => "possibly_same",
            MatchTier::LikelySame => "likely_same",
            MatchTier::SameProduct => "same_product",
        }
    }
}
