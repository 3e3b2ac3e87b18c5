//! # Embeddings (`embedding`)
//!
//! Everything the grouping engine needs to know about image embeddings:
//!
//! - [`Embedding`] / [`StoredEmbedding`]: a vector for one image of one tenant,
//!   optionally tagged with the product group it was filed under.
//! - [`EmbeddingStore`]: the narrow contract of the external store
//!   (`fetch`, `store`, `list`, `assign_group`). [`InMemoryEmbeddingStore`] implements it for
//!   tests and local runs.
//! - [`EmbeddingRepository`]: batched, concurrent, resilient access to a store.
//!   Lookups never fail as a whole; ids whose chunk could not be fetched are
//!   simply absent from the result.
//! - [`EmbeddingProvider`]: the external vision capability that turns image
//!   content into a vector, with a deterministic [`StubEmbeddingProvider`].
//! - Vector helpers: [`cosine_similarity`] and [`l2_normalize_in_place`].

mod error;
mod math;
mod memory;
mod provider;
mod repository;
mod store;
mod types;

pub use crate::error::EmbeddingError;
pub use crate::math::{cosine_similarity, l2_normalize_in_place};
pub use crate::memory::InMemoryEmbeddingStore;
pub use crate::provider::{EmbeddingProvider, ImageSource, StubEmbeddingProvider};
pub use crate::repository::{EmbeddingRepository, RepositoryConfig, RepositoryMetrics};
pub use crate::store::EmbeddingStore;
pub use crate::types::{Embedding, StoredEmbedding};
