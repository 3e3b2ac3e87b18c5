use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Vector representation of one image.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Embedding {
    pub image_id: String,
    pub vector: Vec<f32>,
    pub tenant: String,
    pub created_at: DateTime<Utc>,
    /// Caller metadata of the image, kept so stored images can be compared
    /// on more than their vector.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl Embedding {
    pub fn new(image_id: impl Into<String>, tenant: impl Into<String>, vector: Vec<f32>) -> Self {
        Self {
            image_id: image_id.into(),
            vector,
            tenant: tenant.into(),
            created_at: Utc::now(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.vector.len()
    }

    /// Approximate wire size, used for transfer accounting.
    pub fn byte_len(&self) -> usize {
        let metadata: usize = self.metadata.iter().map(|(k, v)| k.len() + v.len()).sum();
        self.vector.len() * std::mem::size_of::<f32>()
            + self.image_id.len()
            + self.tenant.len()
            + metadata
    }
}

/// An embedding as kept by the store, with the group it was filed under.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredEmbedding {
    #[serde(flatten)]
    pub embedding: Embedding,
    #[serde(default)]
    pub group_id: Option<String>,
}

impl StoredEmbedding {
    pub fn new(embedding: Embedding, group_id: Option<String>) -> Self {
        Self {
            embedding,
            group_id,
        }
    }
}

impl From<Embedding> for StoredEmbedding {
    fn from(embedding: Embedding) -> Self {
        Self::new(embedding, None)
    }
}
