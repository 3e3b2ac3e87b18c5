use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use similarity::MatchTier;
use uuid::Uuid;

/// How a group came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupType {
    Automatic,
    Manual,
    Split,
    Merged,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMetadata {
    pub member_count: usize,
    pub min_similarity: f64,
    pub max_similarity: f64,
    /// Stored images this group was matched to.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub existing_image_ids: Vec<String>,
}

/// A set of images believed to show the same product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductGroup {
    pub id: String,
    pub image_ids: Vec<String>,
    pub confidence: f64,
    pub group_type: GroupType,
    pub metadata: GroupMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProductGroup {
    /// Fresh group id, `pg_` followed by a v4 UUID.
    pub fn new_id() -> String {
        format!("pg_{}", Uuid::new_v4())
    }

    /// Group whose confidence and bounds come from `similarities`.
    ///
    /// An empty similarity set (a single image) is treated as certain.
    pub(crate) fn from_similarities(
        id: String,
        image_ids: Vec<String>,
        group_type: GroupType,
        similarities: &[f64],
    ) -> Self {
        let (confidence, min_similarity, max_similarity) = if similarities.is_empty() {
            (1.0, 1.0, 1.0)
        } else {
            let sum: f64 = similarities.iter().sum();
            let min = similarities.iter().copied().fold(f64::INFINITY, f64::min);
            let max = similarities.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            (sum / similarities.len() as f64, min, max)
        };
        Self::with_bounds(id, image_ids, group_type, confidence, min_similarity, max_similarity)
    }

    pub(crate) fn with_bounds(
        id: String,
        image_ids: Vec<String>,
        group_type: GroupType,
        confidence: f64,
        min_similarity: f64,
        max_similarity: f64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            metadata: GroupMetadata {
                member_count: image_ids.len(),
                min_similarity,
                max_similarity,
                existing_image_ids: Vec::new(),
            },
            image_ids,
            confidence: confidence.clamp(0.0, 1.0),
            group_type,
            name: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn len(&self) -> usize {
        self.image_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.image_ids.is_empty()
    }

    pub fn contains(&self, image_id: &str) -> bool {
        self.image_ids.iter().any(|id| id == image_id)
    }

    pub(crate) fn touch(&mut self) {
        self.metadata.member_count = self.image_ids.len();
        self.updated_at = Utc::now();
    }
}

/// Why an image took no part in grouping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub image_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupingResult {
    pub groups: Vec<ProductGroup>,
    pub ungrouped_image_ids: Vec<String>,
    pub processing_time_ms: u64,
    /// Share of images served by the existing-embedding store.
    pub cache_hit_rate: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<Diagnostic>,
}

impl GroupingResult {
    pub fn group_of(&self, image_id: &str) -> Option<&ProductGroup> {
        self.groups.iter().find(|g| g.contains(image_id))
    }

    /// Total images accounted for, grouped or not.
    pub fn image_count(&self) -> usize {
        self.groups.iter().map(ProductGroup::len).sum::<usize>() + self.ungrouped_image_ids.len()
    }
}

/// A stored image a new image resembles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExistingMatch {
    /// Id of the stored image.
    pub image_id: String,
    /// Group the stored image was filed under, if any.
    pub group_id: Option<String>,
    pub score: f64,
    pub tier: MatchTier,
}

impl ExistingMatch {
    pub fn new(image_id: impl Into<String>, group_id: Option<String>, score: f64) -> Self {
        Self {
            image_id: image_id.into(),
            group_id,
            score,
            tier: MatchTier::classify(score),
        }
    }
}

/// New image id to its candidate stored matches.
pub type ExistingMatches = HashMap<String, Vec<ExistingMatch>>;
