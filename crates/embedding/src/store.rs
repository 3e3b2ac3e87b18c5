use async_trait::async_trait;
use resilience::DependencyError;

use crate::types::{Embedding, StoredEmbedding};

/// Contract of the external embedding store.
///
/// Implementations report transport problems as [`DependencyError`] so the
/// repository's resilient client can classify and retry them. Ids the store
/// does not know are left out of `fetch` results rather than reported as
/// errors.
#[async_trait]
pub trait EmbeddingStore: Send + Sync {
    async fn fetch(
        &self,
        tenant: &str,
        image_ids: &[String],
    ) -> Result<Vec<Embedding>, DependencyError>;

    async fn store(&self, embedding: &Embedding) -> Result<(), DependencyError>;

    /// Up to `limit` stored embeddings of `tenant`, in a stable order.
    async fn list(&self, tenant: &str, limit: usize)
        -> Result<Vec<StoredEmbedding>, DependencyError>;

    /// File a stored image under `group_id`, replacing any earlier group.
    /// Returns `false` when the image is not stored.
    async fn assign_group(
        &self,
        tenant: &str,
        image_id: &str,
        group_id: &str,
    ) -> Result<bool, DependencyError>;
}
