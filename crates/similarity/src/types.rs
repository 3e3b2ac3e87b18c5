use serde::{Deserialize, Serialize};

use crate::error::SignalError;

/// Allowed distance between the weight sum and 1.0.
pub const WEIGHT_SUM_EPSILON: f64 = 1e-2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Spatial,
    Feature,
    Semantic,
    Composition,
    Background,
}

impl SignalKind {
    pub const ALL: [SignalKind; 5] = [
        SignalKind::Spatial,
        SignalKind::Feature,
        SignalKind::Semantic,
        SignalKind::Composition,
        SignalKind::Background,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SignalKind::Spatial => "spatial",
            SignalKind::Feature => "feature",
            SignalKind::Semantic => "semantic",
            SignalKind::Composition => "composition",
            SignalKind::Background => "background",
        }
    }
}

/// Per-signal similarity of one pair, each in [0, 1].
///
/// Unavailable signals hold 0 and are listed in
/// [`SimilarityScore::unavailable`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalScores {
    pub spatial: f64,
    pub feature: f64,
    pub semantic: f64,
    pub composition: f64,
    pub background: f64,
}

impl SignalScores {
    pub fn get(&self, kind: SignalKind) -> f64 {
        match kind {
            SignalKind::Spatial => self.spatial,
            SignalKind::Feature => self.feature,
            SignalKind::Semantic => self.semantic,
            SignalKind::Composition => self.composition,
            SignalKind::Background => self.background,
        }
    }

    pub fn set(&mut self, kind: SignalKind, value: f64) {
        let slot = match kind {
            SignalKind::Spatial => &mut self.spatial,
            SignalKind::Feature => &mut self.feature,
            SignalKind::Semantic => &mut self.semantic,
            SignalKind::Composition => &mut self.composition,
            SignalKind::Background => &mut self.background,
        };
        *slot = value;
    }
}

/// Weight of each signal in the overall score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalWeights {
    pub spatial: f64,
    pub feature: f64,
    pub semantic: f64,
    pub composition: f64,
    pub background: f64,
}

impl Default for SignalWeights {
    fn default() -> Self {
        Self {
            spatial: 0.2,
            feature: 0.2,
            semantic: 0.2,
            composition: 0.2,
            background: 0.2,
        }
    }
}

impl SignalWeights {
    /// All weight on one signal.
    pub fn only(kind: SignalKind) -> Self {
        let mut weights = Self {
            spatial: 0.0,
            feature: 0.0,
            semantic: 0.0,
            composition: 0.0,
            background: 0.0,
        };
        match kind {
            SignalKind::Spatial => weights.spatial = 1.0,
            SignalKind::Feature => weights.feature = 1.0,
            SignalKind::Semantic => weights.semantic = 1.0,
            SignalKind::Composition => weights.composition = 1.0,
            SignalKind::Background => weights.background = 1.0,
        }
        weights
    }

    pub fn get(&self, kind: SignalKind) -> f64 {
        match kind {
            SignalKind::Spatial => self.spatial,
            SignalKind::Feature => self.feature,
            SignalKind::Semantic => self.semantic,
            SignalKind::Composition => self.composition,
            SignalKind::Background => self.background,
        }
    }

    pub fn sum(&self) -> f64 {
        SignalKind::ALL.iter().map(|&k| self.get(k)).sum()
    }

    /// Each weight in [0, 1] and the total within [`WEIGHT_SUM_EPSILON`] of 1.
    pub fn validate(&self) -> Result<(), SignalError> {
        for kind in SignalKind::ALL {
            let w = self.get(kind);
            if !w.is_finite() || !(0.0..=1.0).contains(&w) {
                return Err(SignalError::InvalidWeights(format!(
                    "{} weight {w} is outside [0, 1]",
                    kind.as_str()
                )));
            }
        }
        let sum = self.sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_EPSILON {
            return Err(SignalError::InvalidWeights(format!(
                "weights sum to {sum:.4}, expected 1.0 (+/- {WEIGHT_SUM_EPSILON})"
            )));
        }
        Ok(())
    }
}

/// Overall similarity of an unordered image pair.
///
/// `image_a < image_b` lexicographically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityScore {
    pub image_a: String,
    pub image_b: String,
    pub overall_score: f64,
    pub signal_scores: SignalScores,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unavailable: Vec<SignalKind>,
}
