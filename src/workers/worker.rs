//! A single typed worker and its builder.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::core::task::{HandlerContext, TaskArgs, TaskHandler};

use super::{WorkKind, WorkerError, WorkerType};

/// Worker availability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    /// Ready for work.
    Idle,
    /// Processing an item.
    Busy,
    /// Last item failed; still accepts work.
    Error,
    /// Taken out of rotation.
    Offline,
}

/// Running totals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerMetrics {
    /// Successful items.
    pub tasks_completed: u64,
    /// Failed items, timeouts included.
    pub tasks_failed: u64,
    /// Seconds spent across all items.
    pub total_execution_time: f64,
    /// When the last item finished.
    pub last_task_time: Option<DateTime<Utc>>,
}

impl WorkerMetrics {
    /// Fold in one finished item.
    pub fn record(&mut self, execution_time: f64, success: bool) {
        if success {
            self.tasks_completed += 1;
        } else {
            self.tasks_failed += 1;
        }
        self.total_execution_time += execution_time;
        self.last_task_time = Some(Utc::now());
    }

    /// Items processed.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.tasks_completed + self.tasks_failed
    }

    /// Completed over processed; 1.0 before the first item.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        match self.total() {
            0 => 1.0,
            n => self.tasks_completed as f64 / n as f64,
        }
    }

    /// Mean seconds per item.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn average_execution_time(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            n => self.total_execution_time / n as f64,
        }
    }
}

/// One unit of work for a worker.
#[derive(Debug, Clone)]
pub struct WorkItem {
    /// Caller's id for the item.
    pub task_id: String,
    /// Subtype key, e.g. `"quick"`.
    pub subtype: String,
    /// Handler arguments.
    pub args: TaskArgs,
    /// Overrides the worker's default timeout.
    pub timeout: Option<Duration>,
    /// Cancelled on timeout, or by the caller.
    pub cancel: CancellationToken,
}

impl WorkItem {
    /// Item with a fresh cancellation token and the default timeout.
    pub fn new(task_id: impl Into<String>, subtype: impl Into<String>, args: TaskArgs) -> Self {
        Self {
            task_id: task_id.into(),
            subtype: subtype.into(),
            args,
            timeout: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Override the timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Use the caller's cancellation token.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Structured outcome of one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerReport {
    /// Worker that ran it.
    pub worker_id: String,
    /// Worker family.
    pub worker_type: WorkerType,
    /// Caller's id.
    pub task_id: String,
    /// Start time.
    pub started_at: DateTime<Utc>,
    /// End time.
    pub completed_at: DateTime<Utc>,
    /// Whether the handler succeeded within the timeout.
    pub success: bool,
    /// Handler output.
    pub result: Option<Value>,
    /// Failure description.
    pub error: Option<String>,
    /// Seconds spent.
    pub execution_time: f64,
}

/// Point-in-time view of a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerStatus {
    /// Worker id.
    pub worker_id: String,
    /// Worker family.
    pub worker_type: WorkerType,
    /// Availability.
    pub state: WorkerState,
    /// Item in progress.
    pub current_task: Option<String>,
    /// Running totals.
    pub metrics: WorkerMetrics,
    /// Derived success rate.
    pub success_rate: f64,
    /// Derived mean duration.
    pub average_execution_time: f64,
}

struct Slot {
    state: WorkerState,
    current_task: Option<String>,
}

/// Returns the worker to a resting state even if `process` is dropped mid-item.
struct BusyGuard<'a> {
    slot: &'a Mutex<Slot>,
    resting: WorkerState,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        let mut slot = self.slot.lock();
        if slot.state == WorkerState::Busy {
            slot.state = self.resting;
        }
        slot.current_task = None;
    }
}

/// Typed worker. Processes at most one item at a time.
pub struct Worker<K: WorkKind> {
    id: String,
    timeout: Duration,
    handlers: HashMap<K, Arc<dyn TaskHandler>>,
    slot: Mutex<Slot>,
    metrics: Mutex<WorkerMetrics>,
}

impl<K: WorkKind> fmt::Debug for Worker<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("worker_type", &K::WORKER_TYPE)
            .field("timeout", &self.timeout)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl<K: WorkKind> Worker<K> {
    /// Worker id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Default per-item timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Current availability.
    #[must_use]
    pub fn state(&self) -> WorkerState {
        self.slot.lock().state
    }

    /// Copy of the running totals.
    #[must_use]
    pub fn metrics(&self) -> WorkerMetrics {
        self.metrics.lock().clone()
    }

    /// Take the worker out of rotation. An item in progress finishes.
    pub fn set_offline(&self) {
        self.slot.lock().state = WorkerState::Offline;
        info!(worker_id = %self.id, "worker offline");
    }

    /// Return an offline worker to rotation.
    pub fn set_online(&self) {
        let mut slot = self.slot.lock();
        if slot.state == WorkerState::Offline {
            slot.state = WorkerState::Idle;
            info!(worker_id = %self.id, "worker online");
        }
    }

    /// Status snapshot.
    #[must_use]
    pub fn status(&self) -> WorkerStatus {
        let (state, current_task) = {
            let slot = self.slot.lock();
            (slot.state, slot.current_task.clone())
        };
        let metrics = self.metrics();
        WorkerStatus {
            worker_id: self.id.clone(),
            worker_type: K::WORKER_TYPE,
            state,
            current_task,
            success_rate: metrics.success_rate(),
            average_execution_time: metrics.average_execution_time(),
            metrics,
        }
    }

    /// Run one item through its subtype handler.
    ///
    /// Handler failures and timeouts come back as a report with
    /// `success == false`; only dispatch problems are errors.
    ///
    /// # Errors
    ///
    /// `UnknownSubtype` for keys outside `K`, `UnboundSubtype` if no handler
    /// is bound, `Busy` while another item runs, `Offline` when out of rotation.
    pub async fn process(&self, item: WorkItem) -> Result<WorkerReport, WorkerError> {
        let kind = K::parse(&item.subtype).ok_or_else(|| WorkerError::UnknownSubtype {
            worker_type: K::WORKER_TYPE,
            subtype: item.subtype.clone(),
        })?;
        let handler = self
            .handlers
            .get(&kind)
            .cloned()
            .ok_or_else(|| WorkerError::UnboundSubtype(item.subtype.clone()))?;

        {
            let mut slot = self.slot.lock();
            match slot.state {
                WorkerState::Busy => return Err(WorkerError::Busy(self.id.clone())),
                WorkerState::Offline => return Err(WorkerError::Offline(self.id.clone())),
                WorkerState::Idle | WorkerState::Error => {
                    slot.state = WorkerState::Busy;
                    slot.current_task = Some(item.task_id.clone());
                }
            }
        }
        let mut guard = BusyGuard {
            slot: &self.slot,
            resting: WorkerState::Idle,
        };

        let timeout = item.timeout.unwrap_or(self.timeout);
        let started_at = Utc::now();
        let clock = Instant::now();
        debug!(worker_id = %self.id, task_id = %item.task_id, subtype = kind.as_str(), "worker processing");

        let ctx = HandlerContext::new(
            item.task_id.clone(),
            kind.as_str(),
            0,
            item.args,
            item.cancel.clone(),
        );
        ctx.assign_worker(self.id.clone());
        let outcome = match tokio::time::timeout(timeout, handler.run(ctx)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(format!("{e:#}")),
            Err(_) => {
                item.cancel.cancel();
                Err(format!("timeout after {} seconds", timeout.as_secs()))
            }
        };

        let execution_time = clock.elapsed().as_secs_f64();
        let success = outcome.is_ok();
        self.metrics.lock().record(execution_time, success);
        if !success {
            guard.resting = WorkerState::Error;
        }
        drop(guard);

        let (result, error) = match outcome {
            Ok(value) => {
                info!(worker_id = %self.id, task_id = %item.task_id, execution_time, "work item completed");
                (Some(value), None)
            }
            Err(msg) => {
                error!(worker_id = %self.id, task_id = %item.task_id, error = %msg, "work item failed");
                (None, Some(msg))
            }
        };

        Ok(WorkerReport {
            worker_id: self.id.clone(),
            worker_type: K::WORKER_TYPE,
            task_id: item.task_id,
            started_at,
            completed_at: Utc::now(),
            success,
            result,
            error,
            execution_time,
        })
    }
}

/// Binds a handler to every subtype of `K`.
pub struct WorkerBuilder<K: WorkKind> {
    timeout: Duration,
    handlers: HashMap<K, Arc<dyn TaskHandler>>,
}

impl<K: WorkKind> Clone for WorkerBuilder<K> {
    fn clone(&self) -> Self {
        Self {
            timeout: self.timeout,
            handlers: self.handlers.clone(),
        }
    }
}

impl<K: WorkKind> Default for WorkerBuilder<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: WorkKind> WorkerBuilder<K> {
    /// Empty builder with the kind's default timeout.
    #[must_use]
    pub fn new() -> Self {
        Self {
            timeout: K::DEFAULT_TIMEOUT,
            handlers: HashMap::new(),
        }
    }

    /// Bind `handler` to `kind`, replacing any previous binding.
    #[must_use]
    pub fn bind(mut self, kind: K, handler: Arc<dyn TaskHandler>) -> Self {
        self.handlers.insert(kind, handler);
        self
    }

    /// Override the per-item timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build a worker with the given id.
    ///
    /// # Errors
    ///
    /// `UnboundSubtype` naming the first subtype without a handler.
    pub fn build(&self, id: impl Into<String>) -> Result<Worker<K>, WorkerError> {
        if let Some(missing) = K::ALL.iter().find(|k| !self.handlers.contains_key(k)) {
            return Err(WorkerError::UnboundSubtype(missing.as_str().to_owned()));
        }
        Ok(Worker {
            id: id.into(),
            timeout: self.timeout,
            handlers: self.handlers.clone(),
            slot: Mutex::new(Slot {
                state: WorkerState::Idle,
                current_task: None,
            }),
            metrics: Mutex::new(WorkerMetrics::default()),
        })
    }
}
