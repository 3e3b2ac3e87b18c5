//! Shared fixtures for the pipeline integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use prodgroup::{
    BatchConfig, CircuitBreakerConfig, CircuitBreakerManager, DependencyError, Embedding,
    EmbeddingError, EmbeddingProvider, EmbeddingStore, GroupingSettings, ImageSource,
    InMemoryEmbeddingStore, PipelineConfig, ProductGrouper, RetryBackoff, RetryConfig,
    StoredEmbedding, StubEmbeddingProvider,
};

pub const DIM: usize = 32;
pub const TENANT: &str = "acme";

/// Unit vector at `angle` radians in the first two dimensions.
///
/// The cosine of two such vectors is the cosine of the angle between them.
pub fn unit(angle: f32) -> Vec<f32> {
    let mut v = vec![0.0; DIM];
    v[0] = angle.cos();
    v[1] = angle.sin();
    v
}

/// Angle whose cosine is `score`.
pub fn angle_for(score: f32) -> f32 {
    score.acos()
}

/// Provider with scripted vectors per image id.
///
/// Unknown ids fall back to the deterministic stub. Ids in `failing` always
/// error. Tracks how many embeds run at once.
#[derive(Default)]
pub struct ScriptedProvider {
    vectors: HashMap<String, Vec<f32>>,
    failing: HashSet<String>,
    delay: Option<Duration>,
    pub calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub peak: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_vector(mut self, id: &str, vector: Vec<f32>) -> Self {
        self.vectors.insert(id.to_string(), vector);
        self
    }

    pub fn failing(mut self, id: &str) -> Self {
        self.failing.insert(id.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for ScriptedProvider {
    fn dimension(&self) -> usize {
        DIM
    }

    async fn embed(
        &self,
        image_id: &str,
        source: ImageSource<'_>,
    ) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.contains(image_id) {
            return Err(EmbeddingError::Provider(format!("model rejected {image_id}")));
        }
        match self.vectors.get(image_id) {
            Some(vector) => Ok(vector.clone()),
            None => StubEmbeddingProvider::new(DIM).embed_sync(source),
        }
    }
}

/// Store that refuses every call.
#[derive(Default)]
pub struct DownStore {
    pub calls: AtomicUsize,
}

impl DownStore {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingStore for DownStore {
    async fn fetch(
        &self,
        _tenant: &str,
        _image_ids: &[String],
    ) -> Result<Vec<Embedding>, DependencyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(DependencyError::Connection("connection refused".into()))
    }

    async fn store(&self, _embedding: &Embedding) -> Result<(), DependencyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(DependencyError::Connection("connection refused".into()))
    }

    async fn list(
        &self,
        _tenant: &str,
        _limit: usize,
    ) -> Result<Vec<StoredEmbedding>, DependencyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(DependencyError::Connection("connection refused".into()))
    }

    async fn assign_group(
        &self,
        _tenant: &str,
        _image_id: &str,
        _group_id: &str,
    ) -> Result<bool, DependencyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(DependencyError::Connection("connection refused".into()))
    }
}

/// Config with short delays so failure paths finish quickly.
pub fn test_config(settings: GroupingSettings) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.grouping = settings;
    config.repository.dimension = DIM;
    config.batch = BatchConfig::default().with_backoff(RetryBackoff {
        base_delay: Duration::from_millis(10),
        max_delay: Some(Duration::from_millis(100)),
    });
    config.retry = RetryConfig::default()
        .with_base_delay(Duration::from_millis(1))
        .with_max_delay(Duration::from_millis(10));
    config.circuit_breaker = CircuitBreakerConfig::default().with_failure_threshold(2);
    config
}

pub fn grouper(
    store: Arc<dyn EmbeddingStore>,
    provider: Arc<dyn EmbeddingProvider>,
    settings: GroupingSettings,
) -> (ProductGrouper, CircuitBreakerManager) {
    let config = test_config(settings);
    let breakers = CircuitBreakerManager::new(config.circuit_breaker);
    let grouper = ProductGrouper::from_config(&config, store, provider, &breakers)
        .expect("test config is valid");
    (grouper, breakers)
}

pub fn memory_store() -> Arc<InMemoryEmbeddingStore> {
    Arc::new(InMemoryEmbeddingStore::new())
}

pub fn stored(id: &str, group_id: Option<&str>, vector: Vec<f32>) -> StoredEmbedding {
    StoredEmbedding::new(
        Embedding::new(id, TENANT, vector),
        group_id.map(str::to_string),
    )
}

/// Sorted member sets, ignoring group ids.
pub fn partition(result: &prodgroup::GroupingResult) -> Vec<Vec<String>> {
    let mut sets: Vec<Vec<String>> = result
        .groups
        .iter()
        .map(|g| {
            let mut ids = g.image_ids.clone();
            ids.sort();
            ids
        })
        .collect();
    sets.sort();
    sets
}
