//! Bounded worker pool for cache persistence.
//!
//! Jobs are queued on an unbounded channel and picked up by a fixed number of
//! worker tasks. Each job runs on the blocking thread pool, so file I/O never
//! stalls the async workers. Jobs are best-effort: a job that fails or panics
//! is logged and the worker moves on.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::error::TileError;

/// Upper bound of the default pool size.
pub const MAX_DEFAULT_WORKERS: usize = 4;

/// A unit of persistence work.
pub type WriteJob = Box<dyn FnOnce() + Send + 'static>;

/// Default pool size: half the available parallelism, between 1 and 4.
pub fn default_worker_count() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (cpus / 2).clamp(1, MAX_DEFAULT_WORKERS)
}

/// Fixed-size pool running write jobs off the caller's task.
pub struct WriteScheduler {
    sender: Mutex<Option<mpsc::UnboundedSender<WriteJob>>>,
    workers: AsyncMutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
    outstanding: Arc<AtomicUsize>,
}

impl WriteScheduler {
    /// Start a pool with `worker_count` workers (at least one).
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(worker_count: usize) -> Self {
        let worker_count = worker_count.max(1);
        let (sender, receiver) = mpsc::unbounded_channel::<WriteJob>();
        let receiver = Arc::new(AsyncMutex::new(receiver));
        let outstanding = Arc::new(AtomicUsize::new(0));

        let workers = (0..worker_count)
            .map(|id| {
                let receiver = Arc::clone(&receiver);
                let outstanding = Arc::clone(&outstanding);
                tokio::spawn(async move {
                    loop {
                        let job = { receiver.lock().await.recv().await };
                        let Some(job) = job else { break };

                        if let Err(e) = tokio::task::spawn_blocking(job).await {
                            error!(worker = id, "Cache write job aborted: {}", e);
                        }
                        outstanding.fetch_sub(1, Ordering::AcqRel);
                    }
                    debug!(worker = id, "Cache write worker stopped");
                })
            })
            .collect();

        Self {
            sender: Mutex::new(Some(sender)),
            workers: AsyncMutex::new(workers),
            worker_count,
            outstanding,
        }
    }

    /// Queue a job. Never blocks.
    ///
    /// Fails with [`TileError::SchedulerClosed`] after [`shutdown`](Self::shutdown);
    /// the job is dropped without running.
    pub fn schedule<F>(&self, job: F) -> Result<(), TileError>
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = sender.as_ref() else {
            return Err(TileError::SchedulerClosed);
        };
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        if sender.send(Box::new(job)).is_err() {
            self.outstanding.fetch_sub(1, Ordering::AcqRel);
            return Err(TileError::SchedulerClosed);
        }
        Ok(())
    }

    /// Jobs queued or running.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Whether [`shutdown`](Self::shutdown) has been requested.
    pub fn is_closed(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Stop accepting jobs and wait for every queued job to finish.
    pub async fn shutdown(&self) {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(sender);

        let handles: Vec<_> = self.workers.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                error!("Cache write worker failed: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for WriteScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteScheduler")
            .field("worker_count", &self.worker_count)
            .field("outstanding", &self.outstanding())
            .finish()
    }
}
