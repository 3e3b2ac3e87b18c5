//! Request types and the settings a grouping call resolves to.

use std::collections::{BTreeMap, HashSet};

use bytes::Bytes;
use cluster::ClusterConfig;
use embedding::ImageSource;
use serde::{Deserialize, Serialize};
use similarity::{MissingSignalPolicy, SignalWeights};
use tracing::warn;

use crate::error::GroupingError;

/// Largest raw image accepted for embedding (20 MiB).
pub const MAX_IMAGE_BYTES: usize = 20 * 1024 * 1024;

/// Where an image's pixels come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageContent {
    /// Encoded image bytes supplied inline.
    Bytes(Bytes),
    /// Storage key or URL the embedding provider resolves itself.
    Reference(String),
}

impl ImageContent {
    /// Reject content that cannot be embedded.
    pub fn check(&self) -> Result<(), String> {
        match self {
            ImageContent::Bytes(bytes) if bytes.is_empty() => Err("image content is empty".into()),
            ImageContent::Bytes(bytes) if bytes.len() > MAX_IMAGE_BYTES => Err(format!(
                "image is {} bytes, limit is {MAX_IMAGE_BYTES}",
                bytes.len()
            )),
            ImageContent::Reference(reference) if reference.trim().is_empty() => {
                Err("image reference is empty".into())
            }
            _ => Ok(()),
        }
    }

    pub fn as_source(&self) -> ImageSource<'_> {
        match self {
            ImageContent::Bytes(bytes) => ImageSource::Bytes(bytes),
            ImageContent::Reference(reference) => ImageSource::Reference(reference),
        }
    }
}

/// One image submitted for grouping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDescriptor {
    pub id: String,
    pub content: ImageContent,
    /// Free-form attributes; `labels`, `background`, `width` and `height`
    /// feed the similarity signals.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl ImageDescriptor {
    pub fn new(id: impl Into<String>, content: ImageContent) -> Self {
        Self {
            id: id.into(),
            content,
            metadata: BTreeMap::new(),
        }
    }

    pub fn from_bytes(id: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self::new(id, ImageContent::Bytes(bytes.into()))
    }

    pub fn from_reference(id: impl Into<String>, reference: impl Into<String>) -> Self {
        Self::new(id, ImageContent::Reference(reference.into()))
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A batch of images to group for one tenant.
///
/// Unset options fall back to the grouper's configured [`GroupingSettings`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupingRequest {
    pub images: Vec<ImageDescriptor>,
    pub tenant: String,
    #[serde(default)]
    pub threshold: Option<f64>,
    #[serde(default)]
    pub min_group_size: Option<usize>,
    #[serde(default)]
    pub max_group_size: Option<usize>,
    #[serde(default)]
    pub use_existing_embeddings: Option<bool>,
    #[serde(default)]
    pub signal_weights: Option<SignalWeights>,
}

impl GroupingRequest {
    pub fn new(tenant: impl Into<String>, images: Vec<ImageDescriptor>) -> Self {
        Self {
            images,
            tenant: tenant.into(),
            threshold: None,
            min_group_size: None,
            max_group_size: None,
            use_existing_embeddings: None,
            signal_weights: None,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = Some(threshold);
        self
    }

    pub fn with_min_group_size(mut self, min: usize) -> Self {
        self.min_group_size = Some(min);
        self
    }

    pub fn with_max_group_size(mut self, max: usize) -> Self {
        self.max_group_size = Some(max);
        self
    }

    pub fn with_existing_embeddings(mut self, enabled: bool) -> Self {
        self.use_existing_embeddings = Some(enabled);
        self
    }

    pub fn with_signal_weights(mut self, weights: SignalWeights) -> Self {
        self.signal_weights = Some(weights);
        self
    }

    /// Ids must be non-empty and unique within the request.
    pub fn validate_images(&self) -> Result<(), GroupingError> {
        let mut seen = HashSet::with_capacity(self.images.len());
        for image in &self.images {
            if image.id.trim().is_empty() {
                return Err(GroupingError::Validation("image id must not be empty".into()));
            }
            if !seen.insert(image.id.as_str()) {
                return Err(GroupingError::Validation(format!(
                    "duplicate image id '{}'",
                    image.id
                )));
            }
        }
        Ok(())
    }
}

/// Fully resolved clustering and scoring options, validated once per call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupingSettings {
    #[serde(flatten)]
    pub cluster: ClusterConfig,
    pub signal_weights: SignalWeights,
    pub missing_signal_policy: MissingSignalPolicy,
}

impl Default for GroupingSettings {
    fn default() -> Self {
        Self {
            cluster: ClusterConfig::default(),
            signal_weights: SignalWeights::default(),
            missing_signal_policy: MissingSignalPolicy::default(),
        }
    }
}

impl GroupingSettings {
    pub fn validate(&self) -> Result<(), GroupingError> {
        self.cluster.validate()?;
        self.signal_weights.validate()?;
        Ok(())
    }

    /// Apply the request's overrides on top of these settings and validate
    /// the combination.
    pub fn resolve(&self, request: &GroupingRequest) -> Result<Self, GroupingError> {
        let mut resolved = *self;
        if let Some(threshold) = request.threshold {
            resolved.cluster.threshold = threshold;
        }
        if let Some(min) = request.min_group_size {
            resolved.cluster.min_group_size = min;
        }
        if let Some(max) = request.max_group_size {
            resolved.cluster.max_group_size = max;
        }
        if let Some(enabled) = request.use_existing_embeddings {
            resolved.cluster.use_existing_embeddings = enabled;
        }
        if let Some(weights) = request.signal_weights {
            resolved.signal_weights = weights;
        }
        resolved.validate()?;
        Ok(resolved)
    }
}

/// Strip everything outside `[A-Za-z0-9_-]` from a tenant id.
///
/// Fails when nothing is left.
pub fn sanitize_tenant(raw: &str) -> Result<String, GroupingError> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    if cleaned.is_empty() {
        return Err(GroupingError::InvalidTenant(format!(
            "'{raw}' has no usable characters"
        )));
    }
    if cleaned != raw {
        warn!(original = raw, sanitized = %cleaned, "tenant_id_sanitized");
    }
    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cluster::ClusterError;
    use similarity::{SignalError, SignalKind};

    #[test]
    fn sanitize_tenant_strips_and_rejects() {
        assert_eq!(sanitize_tenant("acme-shop_01").unwrap(), "acme-shop_01");
        assert_eq!(sanitize_tenant("acme/../shop").unwrap(), "acmeshop");
        assert!(matches!(
            sanitize_tenant("../.."),
            Err(GroupingError::InvalidTenant(_))
        ));
        assert!(sanitize_tenant("").is_err());
    }

    #[test]
    fn content_check_rejects_empty_and_oversized() {
        assert!(ImageContent::Bytes(Bytes::new()).check().is_err());
        assert!(ImageContent::Reference("  ".into()).check().is_err());
        assert!(ImageContent::Bytes(Bytes::from_static(b"jpeg")).check().is_ok());

        let big = ImageContent::Bytes(Bytes::from(vec![0u8; MAX_IMAGE_BYTES + 1]));
        let err = big.check().unwrap_err();
        assert!(err.contains("limit"));
        let edge = ImageContent::Bytes(Bytes::from(vec![0u8; MAX_IMAGE_BYTES]));
        assert!(edge.check().is_ok());
    }

    #[test]
    fn request_overrides_take_precedence() {
        let request = GroupingRequest::new("t", Vec::new())
            .with_threshold(0.8)
            .with_min_group_size(2)
            .with_max_group_size(4)
            .with_existing_embeddings(false)
            .with_signal_weights(SignalWeights::only(SignalKind::Feature));

        let resolved = GroupingSettings::default().resolve(&request).unwrap();
        assert_eq!(resolved.cluster.threshold, 0.8);
        assert_eq!(resolved.cluster.min_group_size, 2);
        assert_eq!(resolved.cluster.max_group_size, 4);
        assert!(!resolved.cluster.use_existing_embeddings);
        assert_eq!(resolved.signal_weights, SignalWeights::only(SignalKind::Feature));
    }

    #[test]
    fn resolve_rejects_invalid_combinations() {
        let sizes = GroupingRequest::new("t", Vec::new())
            .with_min_group_size(5)
            .with_max_group_size(2);
        assert!(matches!(
            GroupingSettings::default().resolve(&sizes),
            Err(GroupingError::Cluster(ClusterError::InvalidConfig(_)))
        ));

        let weights = SignalWeights {
            spatial: 0.5,
            ..SignalWeights::default()
        };
        let bad_weights = GroupingRequest::new("t", Vec::new()).with_signal_weights(weights);
        assert!(matches!(
            GroupingSettings::default().resolve(&bad_weights),
            Err(GroupingError::Signal(SignalError::InvalidWeights(_)))
        ));

        let threshold = GroupingRequest::new("t", Vec::new()).with_threshold(1.5);
        assert!(GroupingSettings::default().resolve(&threshold).is_err());
    }

    #[test]
    fn duplicate_and_blank_ids_rejected() {
        let dup = GroupingRequest::new(
            "t",
            vec![
                ImageDescriptor::from_reference("a", "s3://a"),
                ImageDescriptor::from_reference("a", "s3://b"),
            ],
        );
        assert!(matches!(
            dup.validate_images(),
            Err(GroupingError::Validation(msg)) if msg.contains("duplicate")
        ));

        let blank = GroupingRequest::new("t", vec![ImageDescriptor::from_reference(" ", "x")]);
        assert!(blank.validate_images().is_err());
    }

    #[test]
    fn settings_deserialize_flat_with_defaults() {
        let settings: GroupingSettings = serde_json::from_str(
            r#"{"threshold": 0.8, "min_group_size": 2, "missing_signal_policy": "zero"}"#,
        )
        .unwrap();
        assert_eq!(settings.cluster.threshold, 0.8);
        assert_eq!(settings.cluster.min_group_size, 2);
        assert_eq!(settings.cluster.max_group_size, 20);
        assert_eq!(settings.missing_signal_policy, MissingSignalPolicy::Zero);
        assert_eq!(settings.signal_weights, SignalWeights::default());
    }
}
