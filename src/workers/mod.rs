//! Typed workers for scan, alert and report work.
//!
//! A [`Worker`] owns a dispatch table keyed by a subtype ([`WorkKind`]), a
//! per-type timeout and running totals. Workers never run two items at once;
//! a [`WorkerPool`] puts N of them behind a bounded queue on dedicated
//! threads, and [`PoolHandler`] exposes a pool to the engine as a task
//! handler.
//!
//! ```rust,ignore
//! let builder = WorkerBuilder::<ScanKind>::new()
//!     .bind(ScanKind::Full, full_scan_handler)
//!     .bind(ScanKind::Quick, quick_scan_handler);
//! let pool = Arc::new(WorkerPool::new(WorkerPoolConfig::new().with_worker_count(2), &builder)?);
//! registry.register(BuiltinTask::FullScan.definition(PoolHandler::shared(&pool, ScanKind::Full)))?;
//! ```

pub mod kinds;
pub mod manager;
pub mod pool;
pub mod worker;

pub use kinds::{AlertAction, ReportKind, ScanKind, WorkKind, WorkerType};
pub use manager::{ManagerStatus, WorkerGroup, WorkerManager};
pub use pool::{PoolHandler, PoolStats, WorkTicket, WorkerPool};
pub use worker::{WorkItem, Worker, WorkerBuilder, WorkerMetrics, WorkerReport, WorkerState, WorkerStatus};

use thiserror::Error;

/// Errors raised while dispatching work to workers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WorkerError {
    /// A subtype of the worker's kind has no handler bound.
    #[error("no handler bound for subtype `{0}`")]
    UnboundSubtype(String),
    /// The requested subtype is not part of the worker's kind.
    #[error("unknown subtype `{subtype}` for {worker_type} worker")]
    UnknownSubtype {
        /// Worker type that rejected it.
        worker_type: WorkerType,
        /// Requested subtype.
        subtype: String,
    },
    /// The pool queue is full.
    #[error("worker queue is full")]
    QueueFull,
    /// The pool has been shut down.
    #[error("worker pool has been shut down")]
    PoolShutdown,
    /// Configuration validation failed.
    #[error("invalid worker configuration: {0}")]
    InvalidConfig(String),
    /// The worker is already processing an item.
    #[error("worker {0} is busy")]
    Busy(String),
    /// The worker has been taken offline.
    #[error("worker {0} is offline")]
    Offline(String),
    /// Thread or runtime setup failed.
    #[error("worker internal error: {0}")]
    Internal(String),
}
