use serde::{Deserialize, Serialize};

use crate::error::ClusterError;

/// Partitioning constraints, validated by [`ClusterBuilder::new`](crate::ClusterBuilder::new).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClusterConfig {
    /// Minimum overall score for two images to share a group.
    pub threshold: f64,
    pub min_group_size: usize,
    pub max_group_size: usize,
    /// Try stored embeddings before pairwise grouping.
    pub use_existing_embeddings: bool,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            threshold: 0.70,
            min_group_size: 1,
            max_group_size: 20,
            use_existing_embeddings: true,
        }
    }
}

impl ClusterConfig {
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_group_size(mut self, min: usize, max: usize) -> Self {
        self.min_group_size = min;
        self.max_group_size = max;
        self
    }

    pub fn with_existing_embeddings(mut self, enabled: bool) -> Self {
        self.use_existing_embeddings = enabled;
        self
    }

    pub fn validate(&self) -> Result<(), ClusterError> {
        if !self.threshold.is_finite() || !(0.0..=1.0).contains(&self.threshold) {
            return Err(ClusterError::InvalidConfig(format!(
                "threshold {} is outside [0, 1]",
                self.threshold
            )));
        }
        if self.min_group_size == 0 {
            return Err(ClusterError::InvalidConfig(
                "min_group_size must be at least 1".into(),
            ));
        }
        if self.max_group_size < self.min_group_size {
            return Err(ClusterError::InvalidConfig(format!(
                "max_group_size ({}) is smaller than min_group_size ({})",
                self.max_group_size, self.min_group_size
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let cfg = ClusterConfig::default();
        assert_eq!(cfg.threshold, 0.70);
        assert_eq!((cfg.min_group_size, cfg.max_group_size), (1, 20));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_bad_threshold_and_sizes() {
        assert!(ClusterConfig::default().with_threshold(1.2).validate().is_err());
        assert!(ClusterConfig::default().with_threshold(f64::NAN).validate().is_err());
        assert!(ClusterConfig::default().with_group_size(0, 5).validate().is_err());

        let err = ClusterConfig::default()
            .with_group_size(4, 3)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("max_group_size (3)"));
    }
}
