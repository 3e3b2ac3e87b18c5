use async_trait::async_trait;
use fxhash::hash64;

use crate::error::EmbeddingError;
use crate::math::l2_normalize_in_place;

/// Image content handed to an [`EmbeddingProvider`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSource<'a> {
    Bytes(&'a [u8]),
    /// Storage key or URL resolved by the provider.
    Reference(&'a str),
}

impl ImageSource<'_> {
    fn as_bytes(&self) -> &[u8] {
        match self {
            ImageSource::Bytes(bytes) => bytes,
            ImageSource::Reference(reference) => reference.as_bytes(),
        }
    }
}

/// External capability that turns image content into an embedding vector.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Length of every vector this provider returns.
    fn dimension(&self) -> usize;

    async fn embed(
        &self,
        image_id: &str,
        source: ImageSource<'_>,
    ) -> Result<Vec<f32>, EmbeddingError>;
}

/// Deterministic stand-in for a vision model.
///
/// Generates sinusoid values derived from a hash of the content, so identical
/// content always maps to the identical vector.
#[derive(Debug, Clone, Copy)]
pub struct StubEmbeddingProvider {
    dimension: usize,
    normalize: bool,
}

impl StubEmbeddingProvider {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            normalize: true,
        }
    }

    pub fn with_normalize(mut self, normalize: bool) -> Self {
        self.normalize = normalize;
        self
    }

    pub fn embed_sync(&self, source: ImageSource<'_>) -> Result<Vec<f32>, EmbeddingError> {
        let bytes = source.as_bytes();
        if bytes.is_empty() {
            return Err(EmbeddingError::EmptyContent);
        }
        let h = hash64(bytes);
        let mut v: Vec<f32> = (0..self.dimension)
            .map(|idx| ((h >> (idx % 48)) as f32 * 0.0001 + idx as f32).sin())
            .collect();
        if self.normalize {
            l2_normalize_in_place(&mut v);
        }
        Ok(v)
    }
}

impl Default for StubEmbeddingProvider {
    fn default() -> Self {
        Self::new(384)
    }
}

#[async_trait]
impl EmbeddingProvider for StubEmbeddingProvider {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(
        &self,
        _image_id: &str,
        source: ImageSource<'_>,
    ) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_sync(source)
    }
}
