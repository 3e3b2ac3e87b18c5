//! The grouping pipeline.
//!
//! A call runs in four phases:
//!
//! 1. validate the request and resolve its settings,
//! 2. obtain an embedding per image (store lookup first, then the provider)
//!    on a bounded [`BatchExecutor`] pool,
//! 3. match the new images against the tenant's stored embeddings,
//! 4. score every pair and hand the matrix to the [`ClusterBuilder`],
//! 5. file every grouped image under its group in the store, so later calls
//!    can join those groups.
//!
//! Only phase 1 can fail the call. Images that cannot be embedded end up in
//! `ungrouped_image_ids` with a [`Diagnostic`], and an unreachable store
//! skips phases 3 and 5 instead of failing.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use batch::{BatchConfig, BatchExecutor};
use cluster::{
    ClusterBuilder, Diagnostic, ExistingMatch, ExistingMatches, GroupingResult, ScoreMatrix,
};
use embedding::{
    Embedding, EmbeddingError, EmbeddingProvider, EmbeddingRepository, EmbeddingStore,
    StoredEmbedding,
};
use resilience::{CircuitBreakerManager, ResilientClient};
use serde::{Deserialize, Serialize};
use similarity::{ImageFeatures, MatchTier, SimilarityAggregator};
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::error::GroupingError;
use crate::request::{
    GroupingRequest, GroupingSettings, ImageContent, ImageDescriptor, sanitize_tenant,
};
use crate::MetricsSpan;

/// Breaker and client name of the embedding store.
pub const EMBEDDING_STORE_DEPENDENCY: &str = "embedding-store";

/// How stored embeddings are consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExistingMatchConfig {
    /// Stored embeddings listed per tenant.
    pub limit: usize,
    /// Best stored matches kept per new image.
    pub top_k: usize,
}

impl Default for ExistingMatchConfig {
    fn default() -> Self {
        Self {
            limit: 10_000,
            top_k: 5,
        }
    }
}

impl ExistingMatchConfig {
    pub fn validate(&self) -> Result<(), GroupingError> {
        if self.limit == 0 || self.top_k == 0 {
            return Err(GroupingError::Validation(
                "existing.limit and existing.top_k must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct ImageJob {
    id: String,
    content: ImageContent,
    metadata: BTreeMap<String, String>,
    cached: Option<Vec<f32>>,
}

/// Groups product images that show the same physical item.
///
/// Holds no per-call state; one instance serves any number of concurrent
/// [`group`](Self::group) calls.
pub struct ProductGrouper {
    repository: Arc<EmbeddingRepository>,
    provider: Arc<dyn EmbeddingProvider>,
    settings: GroupingSettings,
    batch: BatchConfig,
    existing: ExistingMatchConfig,
}

impl fmt::Debug for ProductGrouper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProductGrouper")
            .field("settings", &self.settings)
            .field("batch", &self.batch)
            .field("existing", &self.existing)
            .finish_non_exhaustive()
    }
}

impl ProductGrouper {
    /// Fails on invalid `settings` or when the provider's vectors would not
    /// fit the repository.
    pub fn new(
        repository: Arc<EmbeddingRepository>,
        provider: Arc<dyn EmbeddingProvider>,
        settings: GroupingSettings,
    ) -> Result<Self, GroupingError> {
        settings.validate()?;
        let expected = repository.config().dimension;
        let actual = provider.dimension();
        if actual != expected {
            return Err(EmbeddingError::Dimension { expected, actual }.into());
        }
        Ok(Self {
            repository,
            provider,
            settings,
            batch: BatchConfig::default(),
            existing: ExistingMatchConfig::default(),
        })
    }

    /// Wire a grouper from a loaded [`PipelineConfig`].
    ///
    /// The store's breaker comes from `breakers`, so every grouper built from
    /// the same manager shares it.
    pub fn from_config(
        config: &PipelineConfig,
        store: Arc<dyn EmbeddingStore>,
        provider: Arc<dyn EmbeddingProvider>,
        breakers: &CircuitBreakerManager,
    ) -> Result<Self, GroupingError> {
        config.circuit_breaker.validate()?;
        config.retry.validate()?;

        let breaker = breakers.get_or_create_with(EMBEDDING_STORE_DEPENDENCY, config.circuit_breaker);
        let client = ResilientClient::new(EMBEDDING_STORE_DEPENDENCY, breaker)
            .with_retry(config.retry.clone())
            .with_call_timeout(config.call_timeout);
        let repository = EmbeddingRepository::new(store, client, config.repository)?;

        Self::new(Arc::new(repository), provider, config.grouping)?
            .with_batch_config(config.batch)?
            .with_existing_config(config.existing)
    }

    pub fn with_batch_config(mut self, batch: BatchConfig) -> Result<Self, GroupingError> {
        batch.validate()?;
        self.batch = batch;
        Ok(self)
    }

    pub fn with_existing_config(mut self, existing: ExistingMatchConfig) -> Result<Self, GroupingError> {
        existing.validate()?;
        self.existing = existing;
        Ok(self)
    }

    pub fn settings(&self) -> &GroupingSettings {
        &self.settings
    }

    pub fn repository(&self) -> &EmbeddingRepository {
        &self.repository
    }

    /// Partition `request.images` into product groups.
    pub async fn group(&self, request: GroupingRequest) -> Result<GroupingResult, GroupingError> {
        let started = Instant::now();
        let metrics = MetricsSpan::start();
        let outcome = self.run(&request, started).await;
        if let Some(span) = metrics {
            span.record_grouping(outcome.as_ref().map(|_| ()).map_err(Clone::clone));
        }

        match &outcome {
            Ok(result) => info!(
                tenant = %request.tenant,
                images = request.images.len(),
                groups = result.groups.len(),
                ungrouped = result.ungrouped_image_ids.len(),
                failed = result.diagnostics.len(),
                cache_hit_rate = result.cache_hit_rate,
                elapsed_ms = result.processing_time_ms,
                "grouping_success"
            ),
            Err(err) => warn!(tenant = %request.tenant, error = %err, "grouping_rejected"),
        }
        outcome
    }

    async fn run(
        &self,
        request: &GroupingRequest,
        started: Instant,
    ) -> Result<GroupingResult, GroupingError> {
        let tenant = sanitize_tenant(&request.tenant)?;
        request.validate_images()?;
        let settings = self.settings.resolve(request)?;
        let builder = ClusterBuilder::new(settings.cluster)?;
        let aggregator =
            SimilarityAggregator::new(settings.signal_weights, settings.missing_signal_policy)?;
        let executor = BatchExecutor::new(self.batch)?;
        let use_existing = settings.cluster.use_existing_embeddings;

        let mut diagnostics = Vec::new();
        let mut failed_ids = Vec::new();
        let mut accepted: Vec<&ImageDescriptor> = Vec::with_capacity(request.images.len());
        for image in &request.images {
            match image.content.check() {
                Ok(()) => accepted.push(image),
                Err(reason) => {
                    debug!(tenant = %tenant, image_id = %image.id, %reason, "image_rejected");
                    failed_ids.push(image.id.clone());
                    diagnostics.push(Diagnostic {
                        image_id: image.id.clone(),
                        reason,
                    });
                }
            }
        }

        // Embeddings: store hits first, the provider for the rest.
        let embed_metrics = MetricsSpan::start();
        let mut prefetched = if use_existing && !accepted.is_empty() {
            let ids: Vec<String> = accepted.iter().map(|image| image.id.clone()).collect();
            self.repository.fetch_batch(&tenant, &ids).await
        } else {
            HashMap::new()
        };

        let jobs: Vec<ImageJob> = accepted
            .iter()
            .map(|image| ImageJob {
                id: image.id.clone(),
                content: image.content.clone(),
                metadata: image.metadata.clone(),
                cached: prefetched.remove(&image.id).map(|e| e.vector),
            })
            .collect();
        let mut hits: HashSet<String> = jobs
            .iter()
            .filter(|job| job.cached.is_some())
            .map(|job| job.id.clone())
            .collect();

        let repository = Arc::clone(&self.repository);
        let provider = Arc::clone(&self.provider);
        let worker_tenant = tenant.clone();
        let embedded = executor
            .process(jobs, move |job: ImageJob, _index| {
                let repository = Arc::clone(&repository);
                let provider = Arc::clone(&provider);
                let tenant = worker_tenant.clone();
                async move { embed_image(&repository, provider.as_ref(), &tenant, job).await }
            })
            .await;

        let mut features = Vec::with_capacity(accepted.len());
        for (image, item) in accepted.iter().zip(embedded.results) {
            match item.data {
                Some(vector) if item.success => features.push(ImageFeatures::from_metadata(
                    image.id.clone(),
                    Some(vector),
                    &image.metadata,
                )),
                _ => {
                    let reason = item.error.unwrap_or_else(|| "embedding failed".into());
                    warn!(
                        tenant = %tenant,
                        image_id = %image.id,
                        retries = item.retries,
                        error = %reason,
                        "image_embedding_failed"
                    );
                    failed_ids.push(image.id.clone());
                    diagnostics.push(Diagnostic {
                        image_id: image.id.clone(),
                        reason,
                    });
                }
            }
        }
        if let Some(span) = embed_metrics {
            span.record_embeddings(features.len(), failed_ids.len());
        }

        let existing = if use_existing && !features.is_empty() {
            match self
                .repository
                .list_existing(&tenant, self.existing.limit)
                .await
            {
                Ok(stored) => {
                    let exclude: HashSet<&str> =
                        request.images.iter().map(|image| image.id.as_str()).collect();
                    Some(self.match_existing(&aggregator, &features, stored, &exclude))
                }
                Err(err) => {
                    warn!(tenant = %tenant, error = %err, "existing_matching_degraded");
                    None
                }
            }
        } else {
            None
        };

        let cluster_metrics = MetricsSpan::start();
        let matrix: ScoreMatrix = aggregator.score_all(&features).iter().collect();
        let ids: Vec<String> = features.iter().map(|f| f.image_id.clone()).collect();
        let mut result = builder.build(&ids, &matrix, existing.as_ref());
        if let Some(span) = cluster_metrics {
            span.record_clustering(result.groups.len(), result.ungrouped_image_ids.len());
        }
        self.record_groups(&tenant, &result).await;

        if let Some(existing) = &existing {
            let threshold = settings.cluster.threshold;
            hits.extend(
                existing
                    .iter()
                    .filter(|(_, matches)| matches.iter().any(|m| m.score >= threshold))
                    .map(|(id, _)| id.clone()),
            );
        }
        let total = request.images.len();
        result.cache_hit_rate = if total == 0 {
            0.0
        } else {
            hits.len() as f64 / total as f64
        };
        result.ungrouped_image_ids.extend(failed_ids);
        result.diagnostics = diagnostics;
        result.processing_time_ms = started.elapsed().as_millis() as u64;
        Ok(result)
    }

    /// File each grouped image, new or stored, under its group. Failures are
    /// logged by the repository and leave the result untouched.
    async fn record_groups(&self, tenant: &str, result: &GroupingResult) {
        let assignments: Vec<(String, String)> = result
            .groups
            .iter()
            .flat_map(|group| {
                group
                    .image_ids
                    .iter()
                    .chain(&group.metadata.existing_image_ids)
                    .map(move |image_id| (image_id.clone(), group.id.clone()))
            })
            .collect();
        if assignments.is_empty() {
            return;
        }
        let linked = self.repository.assign_groups(tenant, &assignments).await;
        debug!(
            tenant,
            requested = assignments.len(),
            linked,
            "group_assignments_recorded"
        );
    }

    /// Best `top_k` stored matches for each new image, strongest first.
    fn match_existing(
        &self,
        aggregator: &SimilarityAggregator,
        features: &[ImageFeatures],
        stored: Vec<StoredEmbedding>,
        exclude: &HashSet<&str>,
    ) -> ExistingMatches {
        let candidates: Vec<(ImageFeatures, Option<String>)> = stored
            .into_iter()
            .filter(|s| !exclude.contains(s.embedding.image_id.as_str()))
            .map(|StoredEmbedding { embedding, group_id }| (stored_features(embedding), group_id))
            .collect();

        let mut out = ExistingMatches::new();
        if candidates.is_empty() {
            return out;
        }
        for image in features {
            let mut matches: Vec<ExistingMatch> = candidates
                .iter()
                .filter_map(|(candidate, group_id)| {
                    let score = aggregator.score(image, candidate).ok()?;
                    Some(ExistingMatch::new(
                        candidate.image_id.clone(),
                        group_id.clone(),
                        score.overall_score,
                    ))
                })
                .collect();
            sort_matches(&mut matches);
            matches.truncate(self.existing.top_k);
            if !matches.is_empty() {
                out.insert(image.image_id.clone(), matches);
            }
        }
        out
    }

    /// Stored images of `tenant` that resemble `image`, strongest first.
    ///
    /// Matches in the [`MatchTier::Different`] tier are left out, as is the
    /// image's own stored copy. Unlike [`group`](Self::group) this fails when
    /// the store cannot be listed.
    pub async fn find_similar(
        &self,
        tenant: &str,
        image: &ImageDescriptor,
    ) -> Result<Vec<ExistingMatch>, GroupingError> {
        let tenant = sanitize_tenant(tenant)?;
        image.content.check().map_err(GroupingError::Validation)?;
        let aggregator = SimilarityAggregator::new(
            self.settings.signal_weights,
            self.settings.missing_signal_policy,
        )?;

        let cached = self
            .repository
            .fetch_batch(&tenant, std::slice::from_ref(&image.id))
            .await
            .remove(&image.id)
            .map(|e| e.vector);
        let vector = match cached {
            Some(vector) => vector,
            None => {
                let vector = self
                    .provider
                    .embed(&image.id, image.content.as_source())
                    .await?;
                check_dimension(self.repository.config().dimension, &vector)?;
                vector
            }
        };
        let query = ImageFeatures::from_metadata(image.id.clone(), Some(vector), &image.metadata);

        let stored = self
            .repository
            .list_existing(&tenant, self.existing.limit)
            .await?;
        let mut matches: Vec<ExistingMatch> = stored
            .into_iter()
            .filter(|s| s.embedding.image_id != image.id)
            .filter_map(|StoredEmbedding { embedding, group_id }| {
                let candidate = stored_features(embedding);
                let score = aggregator.score(&query, &candidate).ok()?;
                Some(ExistingMatch::new(candidate.image_id, group_id, score.overall_score))
            })
            .filter(|m| m.tier != MatchTier::Different)
            .collect();
        sort_matches(&mut matches);

        debug!(tenant = %tenant, image_id = %image.id, matches = matches.len(), "find_similar");
        Ok(matches)
    }
}

async fn embed_image(
    repository: &EmbeddingRepository,
    provider: &dyn EmbeddingProvider,
    tenant: &str,
    job: ImageJob,
) -> Result<Vec<f32>, EmbeddingError> {
    if let Some(vector) = job.cached {
        return Ok(vector);
    }

    let vector = provider.embed(&job.id, job.content.as_source()).await?;
    check_dimension(repository.config().dimension, &vector)?;

    // Persisting is best effort; the vector is still usable for this call.
    let embedding = Embedding::new(job.id, tenant, vector).with_metadata(job.metadata);
    if let Err(err) = repository.store(&embedding).await {
        warn!(
            tenant,
            image_id = %embedding.image_id,
            error = %err,
            "embedding_store_failed"
        );
    }
    Ok(embedding.vector)
}

/// Features of a stored image, from its vector and the metadata it was
/// stored with.
fn stored_features(embedding: Embedding) -> ImageFeatures {
    let Embedding {
        image_id,
        vector,
        metadata,
        ..
    } = embedding;
    ImageFeatures::from_metadata(image_id, Some(vector), &metadata)
}

fn check_dimension(expected: usize, vector: &[f32]) -> Result<(), EmbeddingError> {
    if vector.len() != expected {
        return Err(EmbeddingError::Dimension {
            expected,
            actual: vector.len(),
        });
    }
    Ok(())
}

fn sort_matches(matches: &mut [ExistingMatch]) {
    matches.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.image_id.cmp(&b.image_id))
    });
}
