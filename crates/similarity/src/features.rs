use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Metadata keys read by the signal extractors.
pub const LABELS_KEY: &str = "labels";
pub const WIDTH_KEY: &str = "width";
pub const HEIGHT_KEY: &str = "height";
pub const BACKGROUND_KEY: &str = "background";

/// Everything the signal extractors look at for one image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageFeatures {
    pub image_id: String,
    pub embedding: Option<Vec<f32>>,
    /// Lowercased semantic labels, e.g. `{"mug", "ceramic"}`.
    pub labels: Option<BTreeSet<String>>,
    /// `(width, height)` in pixels.
    pub dimensions: Option<(u32, u32)>,
    /// Lowercased dominant background colours.
    pub background: Option<BTreeSet<String>>,
}

impl ImageFeatures {
    pub fn new(image_id: impl Into<String>) -> Self {
        Self {
            image_id: image_id.into(),
            ..Self::default()
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Build features from an embedding and the image's metadata map.
    ///
    /// `labels` and `background` are comma-separated lists; `width` and
    /// `height` are positive integers. Malformed or empty values leave the
    /// attribute unset.
    pub fn from_metadata(
        image_id: impl Into<String>,
        embedding: Option<Vec<f32>>,
        metadata: &BTreeMap<String, String>,
    ) -> Self {
        let dimensions = match (
            metadata.get(WIDTH_KEY).and_then(|w| parse_pixels(w)),
            metadata.get(HEIGHT_KEY).and_then(|h| parse_pixels(h)),
        ) {
            (Some(w), Some(h)) => Some((w, h)),
            _ => None,
        };

        Self {
            image_id: image_id.into(),
            embedding,
            labels: metadata.get(LABELS_KEY).and_then(|v| parse_list(v)),
            dimensions,
            background: metadata.get(BACKGROUND_KEY).and_then(|v| parse_list(v)),
        }
    }
}

fn parse_pixels(raw: &str) -> Option<u32> {
    raw.trim().parse::<u32>().ok().filter(|&px| px > 0)
}

fn parse_list(raw: &str) -> Option<BTreeSet<String>> {
    let items: BTreeSet<String> = raw
        .split(',')
        .map(|item| item.trim().to_lowercase())
        .filter(|item| !item.is_empty())
        .collect();
    (!items.is_empty()).then_some(items)
}
