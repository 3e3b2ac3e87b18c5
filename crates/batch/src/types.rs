use serde::{Deserialize, Serialize};

/// Terminal outcome for one input item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchItemResult<T> {
    /// Position of the item in the submitted batch.
    pub index: usize,
    pub success: bool,
    /// Present iff `success`.
    pub data: Option<T>,
    /// Present iff not `success`.
    pub error: Option<String>,
    /// Retries actually consumed.
    pub retries: u32,
    /// From the item's first start to its terminal result, backoff included.
    pub processing_time_ms: u64,
}

impl<T> BatchItemResult<T> {
    pub(crate) fn succeeded(index: usize, data: T, retries: u32, processing_time_ms: u64) -> Self {
        Self {
            index,
            success: true,
            data: Some(data),
            error: None,
            retries,
            processing_time_ms,
        }
    }

    pub(crate) fn failed(
        index: usize,
        error: impl Into<String>,
        retries: u32,
        processing_time_ms: u64,
    ) -> Self {
        Self {
            index,
            success: false,
            data: None,
            error: Some(error.into()),
            retries,
            processing_time_ms,
        }
    }
}

/// Results for a whole batch, `results[i].index == i`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchResult<T> {
    pub total_items: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub results: Vec<BatchItemResult<T>>,
    pub total_time_ms: u64,
}

impl<T> BatchResult<T> {
    /// Successful outputs paired with their input index.
    pub fn successes(&self) -> impl Iterator<Item = (usize, &T)> {
        self.results
            .iter()
            .filter_map(|r| r.data.as_ref().map(|d| (r.index, d)))
    }

    /// Failed items paired with their error message.
    pub fn failures(&self) -> impl Iterator<Item = (usize, &str)> {
        self.results
            .iter()
            .filter(|r| !r.success)
            .map(|r| (r.index, r.error.as_deref().unwrap_or("unknown error")))
    }
}

/// Snapshot emitted after every settled item.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BatchProgress {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub in_progress: usize,
    /// `(completed + failed) / total * 100`.
    pub percentage: f64,
}
