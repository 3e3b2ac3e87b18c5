//! # Batch executor (`batch`)
//!
//! Runs an async worker over every item of a batch with at most
//! `max_concurrency` items in flight, retrying failed items with exponential
//! backoff and recording one [`BatchItemResult`] per input, at the input's
//! original position.
//!
//! A fixed pool of worker tasks pulls jobs from a shared queue and reports
//! back to a single coordinator over a channel. The coordinator owns all
//! bookkeeping: it schedules retries (each retry waits in its own timer task,
//! so a backing-off item never holds a worker slot), fills the result table,
//! and fires the progress and per-item callbacks.
//!
//! Worker errors and worker panics become failed items. [`BatchExecutor::process`]
//! itself never fails.
//!
//! Workers and retry timers are owned by the call. Dropping it (say, under
//! an outer `tokio::time::timeout`) aborts them; [`BatchExecutor::process_with`]
//! has already handed every settled item to its callback by then.
//! [`BatchExecutor::process_until`] instead returns a full [`BatchResult`] at
//! a deadline, with unsettled items marked failed.
//!
//! ```no_run
//! use batch::{BatchConfig, BatchExecutor};
//!
//! # async fn run() -> Result<(), batch::BatchError> {
//! let executor = BatchExecutor::new(BatchConfig::default().with_max_concurrency(4))?
//!     .with_progress(|p| println!("{}/{} done", p.completed + p.failed, p.total));
//!
//! let result = executor
//!     .process(vec![1u32, 2, 3], |n, _index| async move {
//!         if n == 0 { Err("zero") } else { Ok(n * 2) }
//!     })
//!     .await;
//!
//! assert_eq!(result.results.len(), 3);
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod executor;
mod types;

pub use crate::config::{BatchConfig, RetryBackoff};
pub use crate::error::BatchError;
pub use crate::executor::{BatchExecutor, ProgressCallback};
pub use crate::types::{BatchItemResult, BatchProgress, BatchResult};
