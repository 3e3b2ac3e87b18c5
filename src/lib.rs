//! Workspace umbrella crate for product identity clustering.
//!
//! Given a batch of product photos for one tenant, [`ProductGrouper`] decides
//! which of them show the same physical item. It embeds each image on a
//! bounded worker pool, reuses embeddings the tenant already has on file,
//! scores every pair over five similarity signals and partitions the images
//! with complete-link clustering.
//!
//! The stage crates are re-exported so callers need a single dependency:
//!
//! - `resilience`: circuit breaker and retrying client for the embedding store
//! - `batch`: bounded-concurrency executor with per-item retry
//! - `embedding`: store and provider contracts, repository, vector math
//! - `similarity`: signals, weights and the score aggregator
//! - `cluster`: the partitioning algorithm and post-hoc group edits
//!
//! ```no_run
//! use std::sync::Arc;
//! use prodgroup::{
//!     CircuitBreakerManager, GroupingRequest, ImageDescriptor, InMemoryEmbeddingStore,
//!     PipelineConfig, ProductGrouper, StubEmbeddingProvider,
//! };
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PipelineConfig::default();
//! let grouper = ProductGrouper::from_config(
//!     &config,
//!     Arc::new(InMemoryEmbeddingStore::new()),
//!     Arc::new(StubEmbeddingProvider::new(config.repository.dimension)),
//!     &CircuitBreakerManager::default(),
//! )?;
//!
//! let request = GroupingRequest::new(
//!     "acme",
//!     vec![
//!         ImageDescriptor::from_reference("front", "s3://catalog/mug-front.jpg"),
//!         ImageDescriptor::from_reference("side", "s3://catalog/mug-side.jpg"),
//!     ],
//! );
//! let result = grouper.group(request).await?;
//! println!("{} groups", result.groups.len());
//! # Ok(())
//! # }
//! ```

pub mod config;
mod error;
mod grouper;
mod request;

pub use batch::{
    BatchConfig, BatchError, BatchExecutor, BatchItemResult, BatchProgress, BatchResult,
    ProgressCallback, RetryBackoff,
};
pub use cluster::{
    ClusterBuilder, ClusterConfig, ClusterError, Diagnostic, ExistingMatch, ExistingMatches,
    GroupError, GroupManager, GroupMetadata, GroupType, GroupingResult, ProductGroup, ScoreMatrix,
};
pub use embedding::{
    Embedding, EmbeddingError, EmbeddingProvider, EmbeddingRepository, EmbeddingStore,
    ImageSource, InMemoryEmbeddingStore, RepositoryConfig, RepositoryMetrics, StoredEmbedding,
    StubEmbeddingProvider, cosine_similarity,
};
pub use resilience::{
    Admission, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerManager, CircuitBreakerStats,
    CircuitState, DependencyError, ResilienceError, ResilientClient, RetryConfig,
};
pub use similarity::{
    ImageFeatures, MatchTier, MissingSignalPolicy, SignalError, SignalKind, SignalScores,
    SignalWeights, SimilarityAggregator, SimilarityScore,
};

pub use crate::config::{ConfigLoadError, PipelineConfig};
pub use crate::error::GroupingError;
pub use crate::grouper::{EMBEDDING_STORE_DEPENDENCY, ExistingMatchConfig, ProductGrouper};
pub use crate::request::{
    GroupingRequest, GroupingSettings, ImageContent, ImageDescriptor, MAX_IMAGE_BYTES,
    sanitize_tenant,
};

use std::sync::{Arc, OnceLock, RwLock};
use std::time::{Duration, Instant};

/// Metrics observer for the grouping pipeline.
pub trait GroupingMetrics: Send + Sync {
    /// Embedding phase finished; `embedded` images have a vector, `failed` do not.
    fn record_embeddings(&self, latency: Duration, embedded: usize, failed: usize);
    /// Scoring and partitioning finished.
    fn record_clustering(&self, latency: Duration, groups: usize, ungrouped: usize);
    /// A whole `group` call finished.
    fn record_grouping(&self, latency: Duration, result: Result<(), GroupingError>);
}

/// Install or clear the global grouping metrics recorder.
pub fn set_grouping_metrics(recorder: Option<Arc<dyn GroupingMetrics>>) {
    let mut guard = metrics_lock()
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    *guard = recorder;
}

fn metrics_lock() -> &'static RwLock<Option<Arc<dyn GroupingMetrics>>> {
    static METRICS: OnceLock<RwLock<Option<Arc<dyn GroupingMetrics>>>> = OnceLock::new();
    METRICS.get_or_init(|| RwLock::new(None))
}

fn metrics_recorder() -> Option<Arc<dyn GroupingMetrics>> {
    let guard = metrics_lock()
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    guard.clone()
}

pub(crate) struct MetricsSpan {
    recorder: Arc<dyn GroupingMetrics>,
    start: Instant,
}

impl MetricsSpan {
    pub(crate) fn start() -> Option<Self> {
        metrics_recorder().map(|recorder| Self {
            recorder,
            start: Instant::now(),
        })
    }

    pub(crate) fn record_embeddings(self, embedded: usize, failed: usize) {
        self.recorder
            .record_embeddings(self.start.elapsed(), embedded, failed);
    }

    pub(crate) fn record_clustering(self, groups: usize, ungrouped: usize) {
        self.recorder
            .record_clustering(self.start.elapsed(), groups, ungrouped);
    }

    pub(crate) fn record_grouping(self, result: Result<(), GroupingError>) {
        self.recorder.record_grouping(self.start.elapsed(), result);
    }
}
