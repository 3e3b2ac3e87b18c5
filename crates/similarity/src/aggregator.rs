use serde::{Deserialize, Serialize};

use crate::error::SignalError;
use crate::features::ImageFeatures;
use crate::signals;
use crate::types::{SignalKind, SignalScores, SignalWeights, SimilarityScore};

/// What to do with a signal that cannot be computed for a pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingSignalPolicy {
    /// Drop the signal and rescale the remaining weights to sum to 1.
    #[default]
    Renormalize,
    /// Score the signal as 0 and keep every weight.
    Zero,
}

/// Combines per-signal scores into one overall score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityAggregator {
    weights: SignalWeights,
    policy: MissingSignalPolicy,
}

impl SimilarityAggregator {
    /// Fails if `weights` do not validate.
    pub fn new(weights: SignalWeights, policy: MissingSignalPolicy) -> Result<Self, SignalError> {
        weights.validate()?;
        Ok(Self { weights, policy })
    }

    pub fn weights(&self) -> &SignalWeights {
        &self.weights
    }

    pub fn policy(&self) -> MissingSignalPolicy {
        self.policy
    }

    pub fn score(
        &self,
        a: &ImageFeatures,
        b: &ImageFeatures,
    ) -> Result<SimilarityScore, SignalError> {
        if a.image_id == b.image_id {
            return Err(SignalError::SelfPair(a.image_id.clone()));
        }
        let (a, b) = if a.image_id <= b.image_id { (a, b) } else { (b, a) };

        let mut signal_scores = SignalScores::default();
        let mut unavailable = Vec::new();
        for kind in SignalKind::ALL {
            match signals::extract(kind, a, b) {
                Some(value) => signal_scores.set(kind, value),
                None => unavailable.push(kind),
            }
        }

        Ok(SimilarityScore {
            image_a: a.image_id.clone(),
            image_b: b.image_id.clone(),
            overall_score: self.combine(&signal_scores, &unavailable),
            signal_scores,
            unavailable,
        })
    }

    /// Weighted sum of the available signals, clamped to [0, 1].
    pub fn combine(&self, scores: &SignalScores, unavailable: &[SignalKind]) -> f64 {
        let mut weighted = 0.0;
        let mut available_weight = 0.0;
        for kind in SignalKind::ALL {
            if unavailable.contains(&kind) {
                continue;
            }
            let w = self.weights.get(kind);
            weighted += scores.get(kind) * w;
            available_weight += w;
        }

        let overall = match self.policy {
            MissingSignalPolicy::Zero => weighted,
            MissingSignalPolicy::Renormalize if available_weight <= f64::EPSILON => 0.0,
            MissingSignalPolicy::Renormalize => weighted / available_weight,
        };
        overall.clamp(0.0, 1.0)
    }

    /// Scores for every unordered pair, ordered by `(image_a, image_b)`.
    ///
    /// Duplicate ids in `features` are scored once.
    pub fn score_all(&self, features: &[ImageFeatures]) -> Vec<SimilarityScore> {
        let mut sorted: Vec<&ImageFeatures> = features.iter().collect();
        sorted.sort_by(|x, y| x.image_id.cmp(&y.image_id));
        sorted.dedup_by(|x, y| x.image_id == y.image_id);

        let mut out = Vec::with_capacity(sorted.len() * sorted.len().saturating_sub(1) / 2);
        for (i, a) in sorted.iter().enumerate() {
            for b in &sorted[i + 1..] {
                if let Ok(score) = self.score(a, b) {
                    out.push(score);
                }
            }
        }
        out
    }
}

impl Default for SimilarityAggregator {
    fn default() -> Self {
        Self {
            weights: SignalWeights::default(),
            policy: MissingSignalPolicy::default(),
        }
    }
}
