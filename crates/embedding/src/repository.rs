use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use resilience::ResilientClient;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::EmbeddingError;
use crate::store::EmbeddingStore;
use crate::types::{Embedding, StoredEmbedding};

/// Batching and shape constraints for [`EmbeddingRepository`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Ids per store request.
    pub chunk_size: usize,
    /// Store requests in flight at once.
    pub max_concurrent_batches: usize,
    /// Vector length of this deployment; other lengths are discarded.
    pub dimension: usize,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            chunk_size: 10,
            max_concurrent_batches: 5,
            dimension: 384,
        }
    }
}

impl RepositoryConfig {
    pub fn validate(&self) -> Result<(), EmbeddingError> {
        if self.chunk_size == 0 {
            return Err(EmbeddingError::InvalidConfig(
                "chunk_size must be at least 1".into(),
            ));
        }
        if self.max_concurrent_batches == 0 {
            return Err(EmbeddingError::InvalidConfig(
                "max_concurrent_batches must be at least 1".into(),
            ));
        }
        if self.dimension == 0 {
            return Err(EmbeddingError::InvalidConfig(
                "dimension must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Point-in-time view of repository counters.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct RepositoryMetrics {
    pub embeddings_fetched: u64,
    /// Ids whose chunk failed, plus vectors dropped for a wrong dimension.
    pub embeddings_failed: u64,
    pub batches: u64,
    pub failed_batches: u64,
    pub average_batch_size: f64,
    pub average_latency_ms: f64,
    pub bytes_transferred: u64,
    pub stores: u64,
    pub store_failures: u64,
    pub group_assignments: u64,
    pub group_assignment_failures: u64,
}

#[derive(Default)]
struct Counters {
    fetched: AtomicU64,
    failed: AtomicU64,
    batches: AtomicU64,
    failed_batches: AtomicU64,
    batched_ids: AtomicU64,
    latency_micros: AtomicU64,
    bytes: AtomicU64,
    stores: AtomicU64,
    store_failures: AtomicU64,
    assignments: AtomicU64,
    assignment_failures: AtomicU64,
}

/// Batched, concurrent access to an [`EmbeddingStore`] through a
/// [`ResilientClient`].
pub struct EmbeddingRepository {
    store: Arc<dyn EmbeddingStore>,
    client: ResilientClient,
    config: RepositoryConfig,
    counters: Counters,
}

impl EmbeddingRepository {
    pub fn new(
        store: Arc<dyn EmbeddingStore>,
        client: ResilientClient,
        config: RepositoryConfig,
    ) -> Result<Self, EmbeddingError> {
        config.validate()?;
        Ok(Self {
            store,
            client,
            config,
            counters: Counters::default(),
        })
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    pub fn client(&self) -> &ResilientClient {
        &self.client
    }

    /// Look up embeddings for `image_ids`.
    ///
    /// Never fails: ids that are unknown to the store, or whose chunk failed
    /// after retries, are absent from the map. Treat absence as "no prior
    /// embedding".
    pub async fn fetch_batch(&self, tenant: &str, image_ids: &[String]) -> HashMap<String, Embedding> {
        if image_ids.is_empty() {
            return HashMap::new();
        }

        let chunks: Vec<&[String]> = image_ids.chunks(self.config.chunk_size).collect();
        let chunk_count = chunks.len();

        let fetches: Vec<_> = chunks
            .into_iter()
            .map(|chunk| self.fetch_chunk(tenant, chunk))
            .collect();
        let fetched: Vec<Vec<Embedding>> = stream::iter(fetches)
        .buffer_unordered(self.config.max_concurrent_batches)
        .collect()
        .await;

        let found: HashMap<String, Embedding> = fetched
            .into_iter()
            .flatten()
            .map(|embedding| (embedding.image_id.clone(), embedding))
            .collect();

        debug!(
            tenant,
            requested = image_ids.len(),
            found = found.len(),
            chunks = chunk_count,
            "embedding_fetch_batch"
        );
        found
    }

    async fn fetch_chunk(&self, tenant: &str, chunk: &[String]) -> Vec<Embedding> {
        let started = Instant::now();
        let store = &self.store;
        let outcome = self.client.call(move |_| store.fetch(tenant, chunk)).await;

        self.counters.batches.fetch_add(1, Ordering::Relaxed);
        self.counters
            .batched_ids
            .fetch_add(chunk.len() as u64, Ordering::Relaxed);
        self.counters
            .latency_micros
            .fetch_add(started.elapsed().as_micros() as u64, Ordering::Relaxed);

        match outcome {
            Ok(embeddings) => {
                let mut kept = Vec::with_capacity(embeddings.len());
                for embedding in embeddings {
                    if !chunk.contains(&embedding.image_id) || embedding.tenant != tenant {
                        continue;
                    }
                    if embedding.dimension() != self.config.dimension {
                        warn!(
                            tenant,
                            image_id = %embedding.image_id,
                            expected = self.config.dimension,
                            actual = embedding.dimension(),
                            "embedding_dimension_mismatch"
                        );
                        self.counters.failed.fetch_add(1, Ordering::Relaxed);
                        continue;
                    }
                    self.counters
                        .bytes
                        .fetch_add(embedding.byte_len() as u64, Ordering::Relaxed);
                    kept.push(embedding);
                }
                self.counters
                    .fetched
                    .fetch_add(kept.len() as u64, Ordering::Relaxed);
                kept
            }
            Err(err) => {
                warn!(
                    tenant,
                    chunk_size = chunk.len(),
                    error = %err,
                    "embedding_chunk_fetch_failed"
                );
                self.counters.failed_batches.fetch_add(1, Ordering::Relaxed);
                self.counters
                    .failed
                    .fetch_add(chunk.len() as u64, Ordering::Relaxed);
                Vec::new()
            }
        }
    }

    /// Persist one embedding for later runs.
    pub async fn store(&self, embedding: &Embedding) -> Result<(), EmbeddingError> {
        if embedding.dimension() != self.config.dimension {
            return Err(EmbeddingError::Dimension {
                expected: self.config.dimension,
                actual: embedding.dimension(),
            });
        }

        let store = &self.store;
        match self.client.call(move |_| store.store(embedding)).await {
            Ok(()) => {
                self.counters.stores.fetch_add(1, Ordering::Relaxed);
                self.counters
                    .bytes
                    .fetch_add(embedding.byte_len() as u64, Ordering::Relaxed);
                Ok(())
            }
            Err(err) => {
                self.counters.store_failures.fetch_add(1, Ordering::Relaxed);
                Err(err.into())
            }
        }
    }

    /// File stored images under their product groups, as `(image_id, group_id)`.
    ///
    /// Best effort: failed assignments are logged and counted, never
    /// returned. Returns how many stored images were updated.
    pub async fn assign_groups(&self, tenant: &str, assignments: &[(String, String)]) -> usize {
        let store = &self.store;
        let client = &self.client;
        let attempts = assignments.iter().map(|(image_id, group_id)| async move {
            let outcome = client
                .call(move |_| store.assign_group(tenant, image_id, group_id))
                .await;
            match outcome {
                Ok(linked) => {
                    self.counters.assignments.fetch_add(1, Ordering::Relaxed);
                    linked
                }
                Err(err) => {
                    warn!(
                        tenant,
                        image_id = %image_id,
                        group_id = %group_id,
                        error = %err,
                        "group_assignment_failed"
                    );
                    self.counters
                        .assignment_failures
                        .fetch_add(1, Ordering::Relaxed);
                    false
                }
            }
        }).collect::<Vec<_>>();
        let outcomes: Vec<bool> = stream::iter(attempts)
            .buffer_unordered(self.config.max_concurrent_batches)
            .collect()
            .await;

        outcomes.into_iter().filter(|&linked| linked).count()
    }

    /// Stored embeddings of `tenant` to match new images against.
    ///
    /// Vectors with a foreign dimension are skipped.
    pub async fn list_existing(
        &self,
        tenant: &str,
        limit: usize,
    ) -> Result<Vec<StoredEmbedding>, EmbeddingError> {
        let started = Instant::now();
        let store = &self.store;
        let listed = self.client.call(move |_| store.list(tenant, limit)).await?;

        self.counters
            .latency_micros
            .fetch_add(started.elapsed().as_micros() as u64, Ordering::Relaxed);
        self.counters.batches.fetch_add(1, Ordering::Relaxed);

        let dimension = self.config.dimension;
        let (kept, dropped): (Vec<_>, Vec<_>) = listed
            .into_iter()
            .partition(|stored| stored.embedding.dimension() == dimension);
        if !dropped.is_empty() {
            warn!(tenant, dropped = dropped.len(), "existing_embedding_dimension_mismatch");
            self.counters
                .failed
                .fetch_add(dropped.len() as u64, Ordering::Relaxed);
        }

        let bytes: usize = kept.iter().map(|s| s.embedding.byte_len()).sum();
        self.counters
            .batched_ids
            .fetch_add(kept.len() as u64, Ordering::Relaxed);
        self.counters.bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        self.counters
            .fetched
            .fetch_add(kept.len() as u64, Ordering::Relaxed);
        Ok(kept)
    }

    pub fn metrics(&self) -> RepositoryMetrics {
        let c = &self.counters;
        let batches = c.batches.load(Ordering::Relaxed);
        let (average_batch_size, average_latency_ms) = if batches == 0 {
            (0.0, 0.0)
        } else {
            (
                c.batched_ids.load(Ordering::Relaxed) as f64 / batches as f64,
                c.latency_micros.load(Ordering::Relaxed) as f64 / batches as f64 / 1000.0,
            )
        };
        RepositoryMetrics {
            embeddings_fetched: c.fetched.load(Ordering::Relaxed),
            embeddings_failed: c.failed.load(Ordering::Relaxed),
            batches,
            failed_batches: c.failed_batches.load(Ordering::Relaxed),
            average_batch_size,
            average_latency_ms,
            bytes_transferred: c.bytes.load(Ordering::Relaxed),
            stores: c.stores.load(Ordering::Relaxed),
            store_failures: c.store_failures.load(Ordering::Relaxed),
            group_assignments: c.assignments.load(Ordering::Relaxed),
            group_assignment_failures: c.assignment_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryEmbeddingStore;
    use async_trait::async_trait;
    use resilience::{
        CircuitBreaker, CircuitBreakerConfig, CircuitState, DependencyError, RetryConfig,
    };
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    fn client(failure_threshold: u32) -> ResilientClient {
        let breaker = Arc::new(CircuitBreaker::named(
            "embedding-store",
            CircuitBreakerConfig::default().with_failure_threshold(failure_threshold),
        ));
        ResilientClient::new("embedding-store", breaker)
            .with_retry(
                RetryConfig::default()
                    .with_max_retries(1)
                    .with_base_delay(Duration::from_millis(5)),
            )
            .with_call_timeout(Duration::from_millis(200))
    }

    fn config() -> RepositoryConfig {
        RepositoryConfig {
            dimension: 3,
            ..RepositoryConfig::default()
        }
    }

    fn ids(range: std::ops::Range<usize>) -> Vec<String> {
        range.map(|i| format!("img-{i:02}")).collect()
    }

    /// Fails every fetch whose chunk contains a poisoned id.
    struct FlakyStore {
        inner: InMemoryEmbeddingStore,
        poisoned: String,
        fetches: AtomicU32,
    }

    #[async_trait]
    impl EmbeddingStore for FlakyStore {
        async fn fetch(
            &self,
            tenant: &str,
            image_ids: &[String],
        ) -> Result<Vec<Embedding>, DependencyError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if image_ids.contains(&self.poisoned) {
                return Err(DependencyError::Connection("reset by peer".into()));
            }
            self.inner.fetch(tenant, image_ids).await
        }

        async fn store(&self, embedding: &Embedding) -> Result<(), DependencyError> {
            self.inner.store(embedding).await
        }

        async fn list(
            &self,
            tenant: &str,
            limit: usize,
        ) -> Result<Vec<StoredEmbedding>, DependencyError> {
            self.inner.list(tenant, limit).await
        }

        async fn assign_group(
            &self,
            tenant: &str,
            image_id: &str,
            group_id: &str,
        ) -> Result<bool, DependencyError> {
            if image_id == self.poisoned {
                return Err(DependencyError::Connection("reset by peer".into()));
            }
            self.inner.assign_group(tenant, image_id, group_id).await
        }
    }

    async fn seeded(store: &InMemoryEmbeddingStore, ids: &[String]) {
        for (i, id) in ids.iter().enumerate() {
            store
                .store(&Embedding::new(id.clone(), "acme", vec![i as f32, 1.0, 0.0]))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn fetches_across_chunks() {
        let store = Arc::new(InMemoryEmbeddingStore::new());
        let all = ids(0..25);
        seeded(&store, &all[..20]).await;

        let repo = EmbeddingRepository::new(store, client(5), config()).unwrap();
        let found = repo.fetch_batch("acme", &all).await;

        assert_eq!(found.len(), 20);
        assert!(found.contains_key("img-00"));
        assert!(!found.contains_key("img-24"));

        let metrics = repo.metrics();
        assert_eq!(metrics.batches, 3);
        assert_eq!(metrics.embeddings_fetched, 20);
        assert_eq!(metrics.embeddings_failed, 0);
        assert!((metrics.average_batch_size - 25.0 / 3.0).abs() < 1e-9);
        assert!(metrics.bytes_transferred > 0);
    }

    #[tokio::test]
    async fn failed_chunk_is_absent_not_fatal() {
        let inner = InMemoryEmbeddingStore::new();
        let all = ids(0..20);
        seeded(&inner, &all).await;
        let store = Arc::new(FlakyStore {
            inner,
            poisoned: "img-13".into(),
            fetches: AtomicU32::new(0),
        });

        let repo = EmbeddingRepository::new(store.clone(), client(10), config()).unwrap();
        let found = repo.fetch_batch("acme", &all).await;

        // Second chunk (img-10..img-19) failed after one retry.
        assert_eq!(found.len(), 10);
        assert!(found.contains_key("img-09"));
        assert!(!found.contains_key("img-10"));
        assert_eq!(store.fetches.load(Ordering::SeqCst), 3);

        let metrics = repo.metrics();
        assert_eq!(metrics.failed_batches, 1);
        assert_eq!(metrics.embeddings_failed, 10);
    }

    #[tokio::test]
    async fn open_breaker_degrades_to_empty_result() {
        let inner = InMemoryEmbeddingStore::new();
        let all = ids(0..5);
        seeded(&inner, &all).await;
        let store = Arc::new(FlakyStore {
            inner,
            poisoned: "img-00".into(),
            fetches: AtomicU32::new(0),
        });
        let repo = EmbeddingRepository::new(store.clone(), client(2), config()).unwrap();

        assert!(repo.fetch_batch("acme", &all).await.is_empty());
        assert_eq!(repo.client().breaker().state(), CircuitState::Open);

        let before = store.fetches.load(Ordering::SeqCst);
        assert!(repo.fetch_batch("acme", &all[1..]).await.is_empty());
        assert_eq!(store.fetches.load(Ordering::SeqCst), before);
    }

    #[tokio::test]
    async fn wrong_dimension_is_dropped() {
        let store = Arc::new(InMemoryEmbeddingStore::new());
        store
            .store(&Embedding::new("img-00", "acme", vec![1.0, 0.0, 0.0]))
            .await
            .unwrap();
        store
            .store(&Embedding::new("img-01", "acme", vec![1.0, 0.0]))
            .await
            .unwrap();

        let repo = EmbeddingRepository::new(store, client(5), config()).unwrap();
        let found = repo.fetch_batch("acme", &ids(0..2)).await;
        assert_eq!(found.len(), 1);
        assert_eq!(repo.metrics().embeddings_failed, 1);

        let listed = repo.list_existing("acme", 100).await.unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn store_checks_dimension_and_persists() {
        let store = Arc::new(InMemoryEmbeddingStore::new());
        let repo = EmbeddingRepository::new(store.clone(), client(5), config()).unwrap();

        let err = repo
            .store(&Embedding::new("x", "acme", vec![1.0]))
            .await
            .unwrap_err();
        assert!(matches!(err, EmbeddingError::Dimension { expected: 3, actual: 1 }));

        repo.store(&Embedding::new("x", "acme", vec![0.0, 1.0, 0.0]))
            .await
            .unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(repo.metrics().stores, 1);
    }

    #[tokio::test]
    async fn group_assignments_are_best_effort() {
        let inner = InMemoryEmbeddingStore::new();
        let all = ids(0..3);
        seeded(&inner, &all).await;
        let store = Arc::new(FlakyStore {
            inner,
            poisoned: "img-01".into(),
            fetches: AtomicU32::new(0),
        });
        let repo = EmbeddingRepository::new(store.clone(), client(10), config()).unwrap();

        let assignments: Vec<(String, String)> = ["img-00", "img-01", "img-02", "img-99"]
            .iter()
            .map(|id| (id.to_string(), "pg_1".to_string()))
            .collect();
        assert_eq!(repo.assign_groups("acme", &assignments).await, 2);

        let listed = store.inner.list("acme", 10).await.unwrap();
        let groups: Vec<Option<&str>> = listed.iter().map(|s| s.group_id.as_deref()).collect();
        assert_eq!(groups, vec![Some("pg_1"), None, Some("pg_1")]);

        let metrics = repo.metrics();
        assert_eq!(metrics.group_assignments, 3);
        assert_eq!(metrics.group_assignment_failures, 1);
    }

    #[test]
    fn config_validation() {
        assert!(RepositoryConfig::default().validate().is_ok());
        let bad = RepositoryConfig {
            chunk_size: 0,
            ..RepositoryConfig::default()
        };
        assert!(bad.validate().is_err());
    }
}
