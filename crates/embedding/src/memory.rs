use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use resilience::DependencyError;

use crate::store::EmbeddingStore;
use crate::types::{Embedding, StoredEmbedding};

type TenantShelf = BTreeMap<String, StoredEmbedding>;

/// An in-memory store using a `RwLock` around per-tenant maps.
///
/// Listing walks a `BTreeMap`, so results come back sorted by image id.
pub struct InMemoryEmbeddingStore {
    tenants: RwLock<HashMap<String, TenantShelf>>,
}

impl InMemoryEmbeddingStore {
    pub fn new() -> Self {
        Self {
            tenants: RwLock::new(HashMap::new()),
        }
    }

    /// Seed the store, typically with embeddings from earlier grouping runs.
    pub fn insert(&self, stored: StoredEmbedding) -> Result<(), DependencyError> {
        let mut guard = self
            .tenants
            .write()
            .map_err(|_| DependencyError::Other("poisoned lock".into()))?;
        guard
            .entry(stored.embedding.tenant.clone())
            .or_default()
            .insert(stored.embedding.image_id.clone(), stored);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.tenants
            .read()
            .map(|guard| guard.values().map(BTreeMap::len).sum())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryEmbeddingStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingStore for InMemoryEmbeddingStore {
    async fn fetch(
        &self,
        tenant: &str,
        image_ids: &[String],
    ) -> Result<Vec<Embedding>, DependencyError> {
        let guard = self
            .tenants
            .read()
            .map_err(|_| DependencyError::Other("poisoned lock".into()))?;
        let Some(shelf) = guard.get(tenant) else {
            return Ok(Vec::new());
        };
        Ok(image_ids
            .iter()
            .filter_map(|id| shelf.get(id))
            .map(|stored| stored.embedding.clone())
            .collect())
    }

    async fn store(&self, embedding: &Embedding) -> Result<(), DependencyError> {
        let mut guard = self
            .tenants
            .write()
            .map_err(|_| DependencyError::Other("poisoned lock".into()))?;
        let shelf = guard.entry(embedding.tenant.clone()).or_default();
        // Keep the group tag of an image that is being re-embedded.
        let group_id = shelf
            .get(&embedding.image_id)
            .and_then(|previous| previous.group_id.clone());
        shelf.insert(
            embedding.image_id.clone(),
            StoredEmbedding::new(embedding.clone(), group_id),
        );
        Ok(())
    }

    async fn list(
        &self,
        tenant: &str,
        limit: usize,
    ) -> Result<Vec<StoredEmbedding>, DependencyError> {
        let guard = self
            .tenants
            .read()
            .map_err(|_| DependencyError::Other("poisoned lock".into()))?;
        Ok(guard
            .get(tenant)
            .map(|shelf| shelf.values().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn assign_group(
        &self,
        tenant: &str,
        image_id: &str,
        group_id: &str,
    ) -> Result<bool, DependencyError> {
        let mut guard = self
            .tenants
            .write()
            .map_err(|_| DependencyError::Other("poisoned lock".into()))?;
        match guard.get_mut(tenant).and_then(|shelf| shelf.get_mut(image_id)) {
            Some(stored) => {
                stored.group_id = Some(group_id.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
