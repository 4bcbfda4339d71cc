//! Pool of workers on dedicated OS threads.
//!
//! Each thread owns one [`Worker`] and its own single-threaded tokio runtime,
//! so handler work never blocks the engine's runtime. Items reach the threads
//! through a bounded crossbeam channel; a full channel is reported as
//! [`WorkerError::QueueFull`] instead of blocking the caller.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use async_trait::async_trait;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::config::WorkerPoolConfig;
use crate::core::task::{HandlerContext, TaskHandler};

use super::{WorkItem, WorkKind, Worker, WorkerBuilder, WorkerError, WorkerReport, WorkerStatus, WorkerType};

/// How long `shutdown` waits for each thread before detaching it.
const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

type Reply = oneshot::Sender<Result<WorkerReport, WorkerError>>;

struct Job {
    item: WorkItem,
    reply: Reply,
}

/// Pool utilisation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Worker family.
    pub worker_type: Option<WorkerType>,
    /// Threads in the pool.
    pub worker_count: usize,
    /// Items currently running.
    pub active_tasks: u64,
    /// Items waiting in the channel.
    pub queued_tasks: u64,
    /// Items that finished with `success`.
    pub completed_tasks: u64,
    /// Items that failed or were rejected by their worker.
    pub failed_tasks: u64,
    /// Items accepted by `submit`.
    pub submitted_tasks: u64,
}

#[derive(Debug, Default)]
struct PoolCounters {
    active: AtomicU64,
    queued: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    submitted: AtomicU64,
}

/// Pending result of a submitted item.
#[derive(Debug)]
pub struct WorkTicket {
    rx: oneshot::Receiver<Result<WorkerReport, WorkerError>>,
}

impl WorkTicket {
    /// Wait for the worker's report.
    ///
    /// # Errors
    ///
    /// The worker's dispatch error, or `PoolShutdown` if the item was
    /// dropped unprocessed.
    pub async fn wait(self) -> Result<WorkerReport, WorkerError> {
        self.rx.await.map_err(|_| WorkerError::PoolShutdown)?
    }
}

/// Fixed set of `K` workers behind a bounded queue.
pub struct WorkerPool<K: WorkKind> {
    config: WorkerPoolConfig,
    sender: Mutex<Option<Sender<Job>>>,
    workers: Vec<Arc<Worker<K>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<PoolCounters>,
    shutdown: Arc<AtomicBool>,
}

impl<K: WorkKind> std::fmt::Debug for WorkerPool<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("worker_type", &K::WORKER_TYPE)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<K: WorkKind> WorkerPool<K> {
    /// Build `config.worker_count` workers from `builder` and start a thread
    /// for each.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` for a bad configuration, the builder's error when a
    /// subtype is unbound, `Internal` when a thread cannot be spawned.
    pub fn new(config: WorkerPoolConfig, builder: &WorkerBuilder<K>) -> Result<Self, WorkerError> {
        config.validate().map_err(WorkerError::InvalidConfig)?;

        let workers = (0..config.worker_count)
            .map(|i| {
                builder
                    .build(format!("{}_worker_{i}", K::WORKER_TYPE))
                    .map(Arc::new)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let (tx, rx) = bounded::<Job>(config.max_queue_depth);
        let counters = Arc::new(PoolCounters::default());
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut threads = Vec::with_capacity(workers.len());
        for worker in &workers {
            let spawned = spawn_worker(
                Arc::clone(worker),
                rx.clone(),
                Arc::clone(&counters),
                config.thread_stack_size,
            );
            match spawned {
                Ok(handle) => threads.push(handle),
                Err(e) => {
                    shutdown.store(true, Ordering::Release);
                    drop(tx);
                    return Err(WorkerError::Internal(format!(
                        "failed to spawn worker thread: {e}"
                    )));
                }
            }
        }

        info!(
            worker_type = %K::WORKER_TYPE,
            worker_count = config.worker_count,
            max_queue_depth = config.max_queue_depth,
            "worker pool started"
        );

        Ok(Self {
            config,
            sender: Mutex::new(Some(tx)),
            workers,
            threads: Mutex::new(threads),
            counters,
            shutdown,
        })
    }

    /// Enqueue an item without blocking.
    ///
    /// # Errors
    ///
    /// `QueueFull` when the queue is at depth, `PoolShutdown` after shutdown.
    pub fn submit(&self, item: WorkItem) -> Result<WorkTicket, WorkerError> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(WorkerError::PoolShutdown);
        }
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            return Err(WorkerError::PoolShutdown);
        };

        let (reply, rx) = oneshot::channel();
        let task_id = item.task_id.clone();
        // count before sending so a fast worker never decrements first
        self.counters.queued.fetch_add(1, Ordering::Relaxed);
        match sender.try_send(Job { item, reply }) {
            Ok(()) => {
                self.counters.submitted.fetch_add(1, Ordering::Relaxed);
                debug!(task_id = %task_id, worker_type = %K::WORKER_TYPE, "work item queued");
                Ok(WorkTicket { rx })
            }
            Err(TrySendError::Full(_)) => {
                self.counters.queued.fetch_sub(1, Ordering::Relaxed);
                warn!(worker_type = %K::WORKER_TYPE, "worker queue is full");
                Err(WorkerError::QueueFull)
            }
            Err(TrySendError::Disconnected(_)) => {
                self.counters.queued.fetch_sub(1, Ordering::Relaxed);
                Err(WorkerError::PoolShutdown)
            }
        }
    }

    /// Submit and wait for the report.
    ///
    /// # Errors
    ///
    /// See [`Self::submit`] and [`WorkTicket::wait`].
    pub async fn run(&self, item: WorkItem) -> Result<WorkerReport, WorkerError> {
        self.submit(item)?.wait().await
    }

    /// Utilisation counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            worker_type: Some(K::WORKER_TYPE),
            worker_count: self.workers.len(),
            active_tasks: self.counters.active.load(Ordering::Relaxed),
            queued_tasks: self.counters.queued.load(Ordering::Relaxed),
            completed_tasks: self.counters.completed.load(Ordering::Relaxed),
            failed_tasks: self.counters.failed.load(Ordering::Relaxed),
            submitted_tasks: self.counters.submitted.load(Ordering::Relaxed),
        }
    }

    /// Status of every worker in the pool.
    #[must_use]
    pub fn worker_statuses(&self) -> Vec<WorkerStatus> {
        self.workers.iter().map(|w| w.status()).collect()
    }

    /// Stop accepting items, let the threads drain and join them, detaching
    /// any that do not exit within two seconds.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(worker_type = %K::WORKER_TYPE, "shutting down worker pool");
        self.sender.lock().take();

        let threads: Vec<JoinHandle<()>> = self.threads.lock().drain(..).collect();
        let count = threads.len();
        for (idx, handle) in threads.into_iter().enumerate() {
            let (tx, rx) = std::sync::mpsc::channel();
            let joiner = thread::spawn(move || {
                let _ = tx.send(handle.join().is_ok());
            });
            match rx.recv_timeout(JOIN_TIMEOUT) {
                Ok(true) => debug!(worker = idx, "worker thread joined"),
                Ok(false) => warn!(worker = idx, "worker thread panicked"),
                Err(_) => {
                    warn!(worker = idx, "worker thread did not exit in time; detaching");
                    continue;
                }
            }
            let _ = joiner.join();
        }
        info!(worker_type = %K::WORKER_TYPE, worker_count = count, "worker pool stopped");
    }
}

impl<K: WorkKind> Drop for WorkerPool<K> {
    fn drop(&mut self) {
        // no join here; explicit shutdown() waits for the threads
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            self.sender.lock().take();
            debug!(worker_type = %K::WORKER_TYPE, "worker pool dropped without shutdown");
        }
    }
}

fn spawn_worker<K: WorkKind>(
    worker: Arc<Worker<K>>,
    rx: Receiver<Job>,
    counters: Arc<PoolCounters>,
    stack_size: usize,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(worker.id().to_owned())
        .stack_size(stack_size)
        .spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    error!(worker_id = %worker.id(), error = %e, "failed to create worker runtime");
                    return;
                }
            };
            debug!(worker_id = %worker.id(), "worker thread started");

            // recv fails once every sender is gone; queued jobs drain first
            while let Ok(Job { item, reply }) = rx.recv() {
                counters.queued.fetch_sub(1, Ordering::Relaxed);
                counters.active.fetch_add(1, Ordering::Relaxed);

                let outcome = rt.block_on(worker.process(item));

                counters.active.fetch_sub(1, Ordering::Relaxed);
                let ok = matches!(&outcome, Ok(report) if report.success);
                if ok {
                    counters.completed.fetch_add(1, Ordering::Relaxed);
                } else {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                }
                if reply.send(outcome).is_err() {
                    debug!(worker_id = %worker.id(), "submitter went away before the report");
                }
            }
            debug!(worker_id = %worker.id(), "worker thread exiting");
        })
}

/// Runs one fixed subtype on a pool; registers a pool with the engine.
pub struct PoolHandler<K: WorkKind> {
    pool: Arc<WorkerPool<K>>,
    kind: K,
}

impl<K: WorkKind> PoolHandler<K> {
    /// Handler running `kind` items on `pool`.
    #[must_use]
    pub const fn new(pool: Arc<WorkerPool<K>>, kind: K) -> Self {
        Self { pool, kind }
    }

    /// Same as [`Self::new`], boxed for a task definition.
    #[must_use]
    pub fn shared(pool: &Arc<WorkerPool<K>>, kind: K) -> Arc<dyn TaskHandler> {
        Arc::new(Self::new(Arc::clone(pool), kind))
    }
}

#[async_trait]
impl<K: WorkKind> TaskHandler for PoolHandler<K> {
    async fn run(&self, ctx: HandlerContext) -> anyhow::Result<Value> {
        let item = WorkItem::new(ctx.execution_id.clone(), self.kind.as_str(), ctx.args.clone())
            .with_cancel(ctx.cancel.clone());
        let report = self.pool.run(item).await?;
        ctx.assign_worker(report.worker_id.clone());
        if report.success {
            Ok(report.result.unwrap_or(Value::Null))
        } else {
            anyhow::bail!(
                "{} failed on {}: {}",
                self.kind.as_str(),
                report.worker_id,
                report.error.unwrap_or_default()
            )
        }
    }
}
