//! YAML configuration for the grouping pipeline.
//!
//! One file describes every stage. Sections may be omitted; omitted fields
//! take their defaults. Durations are written in milliseconds.
//!
//! ```yaml
//! version: "1.0"
//! name: "catalog-dedupe"
//!
//! grouping:
//!   threshold: 0.7
//!   min_group_size: 1
//!   max_group_size: 20
//!   use_existing_embeddings: true
//!   missing_signal_policy: renormalize
//!   signal_weights:
//!     spatial: 0.2
//!     feature: 0.2
//!     semantic: 0.2
//!     composition: 0.2
//!     background: 0.2
//!
//! batch:
//!   max_concurrency: 3
//!   enable_retry: true
//!   max_retries: 2
//!   backoff:
//!     base_delay: 1000
//!     max_delay: 30000
//!
//! repository:
//!   chunk_size: 10
//!   max_concurrent_batches: 5
//!   dimension: 384
//!
//! circuit_breaker:
//!   failure_threshold: 5
//!   reset_timeout: 60000
//!   success_threshold: 2
//!
//! retry:
//!   max_retries: 3
//!   base_delay: 100
//!   max_delay: 5000
//!   backoff_multiplier: 2.0
//!
//! call_timeout: 10000
//!
//! existing:
//!   limit: 10000
//!   top_k: 5
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use batch::BatchConfig;
use embedding::RepositoryConfig;
use resilience::{CircuitBreakerConfig, RetryConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::grouper::ExistingMatchConfig;
use crate::request::GroupingSettings;

/// Errors that can occur when loading YAML configuration files
#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("unsupported config version: {0}")]
    UnsupportedVersion(String),
}

/// Top-level configuration for a grouping deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PipelineConfig {
    /// Configuration format version
    pub version: String,

    #[serde(default)]
    pub name: Option<String>,

    /// Default clustering and scoring options; requests may override them.
    #[serde(default)]
    pub grouping: GroupingSettings,

    /// Per-image worker pool.
    #[serde(default)]
    pub batch: BatchConfig,

    #[serde(default)]
    pub repository: RepositoryConfig,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    /// Retry policy of the embedding store client.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Hard limit per store attempt, in milliseconds.
    #[serde(default = "default_call_timeout", with = "resilience::serde_millis")]
    pub call_timeout: Duration,

    #[serde(default)]
    pub existing: ExistingMatchConfig,
}

impl PipelineConfig {
    /// Load a YAML configuration file from the given path
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigLoadError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse YAML configuration from a string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigLoadError> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        match self.version.as_str() {
            "1.0" | "1" => Ok(()),
            v => Err(ConfigLoadError::UnsupportedVersion(v.to_string())),
        }?;

        self.grouping.validate().map_err(section_error("grouping"))?;
        self.batch.validate().map_err(section_error("batch"))?;
        self.repository
            .validate()
            .map_err(section_error("repository"))?;
        self.circuit_breaker
            .validate()
            .map_err(section_error("circuit_breaker"))?;
        self.retry.validate().map_err(section_error("retry"))?;
        self.existing.validate().map_err(section_error("existing"))?;

        if self.call_timeout.is_zero() {
            return Err(ConfigLoadError::Validation(
                "call_timeout must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            name: None,
            grouping: GroupingSettings::default(),
            batch: BatchConfig::default(),
            repository: RepositoryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            retry: RetryConfig::default(),
            call_timeout: default_call_timeout(),
            existing: ExistingMatchConfig::default(),
        }
    }
}

fn section_error<E: std::fmt::Display>(section: &'static str) -> impl Fn(E) -> ConfigLoadError {
    move |err| ConfigLoadError::Validation(format!("{section}: {err}"))
}

fn default_call_timeout() -> Duration {
    Duration::from_secs(10)
}
