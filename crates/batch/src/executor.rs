use std::any::Any;
use std::fmt::{self, Display};
use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use tokio::task::{AbortHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::BatchConfig;
use crate::error::BatchError;
use crate::types::{BatchItemResult, BatchProgress, BatchResult};


pub type ProgressCallback = Arc<dyn Fn(BatchProgress) + Send + Sync>;

/// One attempt at one item. `attempt` is 0 for the first try.
#[derive(Debug, Clone, Copy)]
struct Job {
    index: usize,
    attempt: u32,
}

enum Event<T> {
    Started { index: usize },
    Finished { job: Job, outcome: Result<T, String> },
}

/// Bounded-concurrency runner; see the crate docs for the execution model.
#[derive(Clone)]
pub struct BatchExecutor {
    config: BatchConfig,
    on_progress: Option<ProgressCallback>,
}

impl fmt::Debug for BatchExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchExecutor")
            .field("config", &self.config)
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

impl BatchExecutor {
    pub fn new(config: BatchConfig) -> Result<Self, BatchError> {
        config.validate()?;
        Ok(Self {
            config,
            on_progress: None,
        })
    }

    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(BatchProgress) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(callback));
        self
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Run `worker` over every item and wait until each one has a terminal result.
    pub async fn process<I, T, E, W, Fut>(&self, items: Vec<I>, worker: W) -> BatchResult<T>
    where
        I: Clone + Send + Sync + 'static,
        T: Send + 'static,
        E: Display + Send + 'static,
        W: Fn(I, usize) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        self.process_with(items, worker, |_| {}).await
    }

    /// Like [`process`](Self::process), calling `on_item_complete` as each
    /// item reaches its terminal result.
    ///
    /// Dropping the returned future aborts every worker and pending retry;
    /// results handed to `on_item_complete` before that are the partial
    /// outcome.
    pub async fn process_with<I, T, E, W, Fut, C>(
        &self,
        items: Vec<I>,
        worker: W,
        on_item_complete: C,
    ) -> BatchResult<T>
    where
        I: Clone + Send + Sync + 'static,
        T: Send + 'static,
        E: Display + Send + 'static,
        W: Fn(I, usize) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        C: FnMut(&BatchItemResult<T>),
    {
        self.run(items, worker, None, on_item_complete).await
    }

    /// Like [`process`](Self::process), but stops at `deadline`.
    ///
    /// Items settled by then keep their results. The rest are aborted and
    /// reported as failed with the retries they had consumed.
    pub async fn process_until<I, T, E, W, Fut>(
        &self,
        items: Vec<I>,
        worker: W,
        deadline: Instant,
    ) -> BatchResult<T>
    where
        I: Clone + Send + Sync + 'static,
        T: Send + 'static,
        E: Display + Send + 'static,
        W: Fn(I, usize) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        self.run(items, worker, Some(deadline), |_| {}).await
    }

    async fn run<I, T, E, W, Fut, C>(
        &self,
        items: Vec<I>,
        worker: W,
        deadline: Option<Instant>,
        mut on_item_complete: C,
    ) -> BatchResult<T>
    where
        I: Clone + Send + Sync + 'static,
        T: Send + 'static,
        E: Display + Send + 'static,
        W: Fn(I, usize) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        C: FnMut(&BatchItemResult<T>),
    {
        let started = Instant::now();
        let total = items.len();
        if total == 0 {
            return BatchResult {
                total_items: 0,
                success_count: 0,
                failure_count: 0,
                results: Vec::new(),
                total_time_ms: 0,
            };
        }

        let items = Arc::new(items);
        let worker = Arc::new(worker);
        let (job_tx, job_rx) = mpsc::unbounded_channel::<Job>();
        let job_rx = Arc::new(Mutex::new(job_rx));
        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<Event<T>>();

        for index in 0..total {
            if job_tx.send(Job { index, attempt: 0 }).is_err() {
                warn!(index, "batch_enqueue_failed");
            }
        }

        // Both sets abort their tasks when dropped, so a cancelled call
        // leaves nothing running.
        let mut workers = JoinSet::new();
        let mut timers = JoinSet::new();
        let pool_size = self.config.max_concurrency.min(total);
        for _ in 0..pool_size {
            workers.spawn(run_worker(
                Arc::clone(&items),
                Arc::clone(&worker),
                Arc::clone(&job_rx),
                event_tx.clone(),
            ));
        }
        drop(event_tx);

        let mut slots: Vec<Option<BatchItemResult<T>>> = (0..total).map(|_| None).collect();
        let mut first_started: Vec<Option<Instant>> = vec![None; total];
        let mut attempts: Vec<u32> = vec![0; total];
        let mut deadline_hit = false;
        let mut completed = 0usize;
        let mut failed = 0usize;
        let mut in_progress = 0usize;

        while completed + failed < total {
            let next = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, event_rx.recv()).await {
                    Ok(next) => next,
                    Err(_) => {
                        deadline_hit = true;
                        break;
                    }
                },
                None => event_rx.recv().await,
            };
            let Some(event) = next else {
                break;
            };

            let (job, outcome) = match event {
                Event::Started { index } => {
                    in_progress += 1;
                    first_started[index].get_or_insert_with(Instant::now);
                    continue;
                }
                Event::Finished { job, outcome } => (job, outcome),
            };
            attempts[job.index] = job.attempt;
            in_progress = in_progress.saturating_sub(1);

            let elapsed_ms = first_started[job.index]
                .map(|t| t.elapsed().as_millis() as u64)
                .unwrap_or(0);

            let result = match outcome {
                Ok(data) => {
                    completed += 1;
                    BatchItemResult::succeeded(job.index, data, job.attempt, elapsed_ms)
                }
                Err(error)
                    if self.config.enable_retry && job.attempt < self.config.max_retries =>
                {
                    let retry = job.attempt + 1;
                    let delay = self.config.backoff.delay_for(retry);
                    debug!(
                        index = job.index,
                        retry,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "batch_item_retry_scheduled"
                    );
                    let tx = job_tx.clone();
                    let index = job.index;
                    while timers.try_join_next().is_some() {}
                    timers.spawn(async move {
                        tokio::time::sleep(delay).await;
                        if tx
                            .send(Job {
                                index,
                                attempt: retry,
                            })
                            .is_err()
                        {
                            debug!(index, retry, "batch_retry_dropped");
                        }
                    });
                    continue;
                }
                Err(error) => {
                    failed += 1;
                    warn!(
                        index = job.index,
                        retries = job.attempt,
                        error = %error,
                        "batch_item_failed"
                    );
                    BatchItemResult::failed(job.index, error, job.attempt, elapsed_ms)
                }
            };

            on_item_complete(&result);
            slots[job.index] = Some(result);
            self.emit_progress(BatchProgress {
                total,
                completed,
                failed,
                in_progress,
                percentage: (completed + failed) as f64 / total as f64 * 100.0,
            });
        }

        timers.abort_all();
        if deadline_hit {
            warn!(
                total_items = total,
                settled = completed + failed,
                "batch_deadline_exceeded"
            );
            workers.abort_all();
        }
        // Closing the queue lets idle workers drain out.
        drop(job_tx);
        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined {
                if !err.is_cancelled() {
                    warn!(error = %err, "batch_worker_join_failed");
                }
            }
        }

        let unsettled_reason = if deadline_hit {
            "deadline exceeded before item settled"
        } else {
            "worker pool stopped before item settled"
        };
        let results: Vec<BatchItemResult<T>> = slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or_else(|| {
                    let elapsed_ms = first_started[index]
                        .map(|t| t.elapsed().as_millis() as u64)
                        .unwrap_or(0);
                    BatchItemResult::failed(index, unsettled_reason, attempts[index], elapsed_ms)
                })
            })
            .collect();
        let success_count = results.iter().filter(|r| r.success).count();
        let failure_count = total - success_count;
        let total_time_ms = started.elapsed().as_millis() as u64;

        info!(
            total_items = total,
            success_count,
            failure_count,
            max_concurrency = self.config.max_concurrency,
            elapsed_micros = started.elapsed().as_micros() as u64,
            "batch_complete"
        );

        BatchResult {
            total_items: total,
            success_count,
            failure_count,
            results,
            total_time_ms,
        }
    }

    fn emit_progress(&self, progress: BatchProgress) {
        if let Some(callback) = &self.on_progress {
            callback(progress);
        }
    }
}

async fn run_worker<I, T, E, W, Fut>(
    items: Arc<Vec<I>>,
    worker: Arc<W>,
    jobs: Arc<Mutex<UnboundedReceiver<Job>>>,
    events: UnboundedSender<Event<T>>,
) where
    I: Clone + Send + Sync + 'static,
    T: Send + 'static,
    E: Display + Send + 'static,
    W: Fn(I, usize) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
{
    loop {
        let job = {
            let mut rx = jobs.lock().await;
            rx.recv().await
        };
        let Some(job) = job else {
            break;
        };
        if events.send(Event::Started { index: job.index }).is_err() {
            break;
        }

        let item = items[job.index].clone();
        let call = {
            let worker = Arc::clone(&worker);
            let index = job.index;
            async move { worker(item, index).await.map_err(|e| e.to_string()) }
        };

        // A separate task turns a panicking worker into a failed item.
        let call = tokio::spawn(call);
        let _abort = AbortOnDrop(call.abort_handle());
        let outcome = match call.await {
            Ok(outcome) => outcome,
            Err(join_err) if join_err.is_panic() => Err(format!(
                "worker panicked: {}",
                panic_message(join_err.into_panic())
            )),
            Err(_) => Err("worker task cancelled".to_string()),
        };

        if events.send(Event::Finished { job, outcome }).is_err() {
            break;
        }
    }
}

/// Aborts a worker call when the worker itself is aborted mid-await.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
