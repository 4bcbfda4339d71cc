//! Persistence for execution records, system metrics and learning rows.
//!
//! Backends serialize writers; each write lands as a whole row.

pub mod memory;
pub mod sqlite;

use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

use crate::core::error::OrchestratorError;
use crate::core::execution::TaskExecution;
use crate::core::learning::AdaptiveLearningRecord;
use crate::core::monitor::SystemMetricsRecord;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

/// Backend failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Record could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// SQLite rejected a statement or could not open the database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Anything else reported by a backend.
    #[error("backend error: {0}")]
    Backend(String),
}

impl From<StoreError> for OrchestratorError {
    fn from(e: StoreError) -> Self {
        Self::Persistence(e.to_string())
    }
}

/// Rows removed by a prune.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// System metrics rows removed.
    pub metrics: usize,
    /// Execution records removed.
    pub executions: usize,
}

/// Storage seam used by the engine.
pub trait ExecutionStore: Send + Sync {
    /// Insert or replace the record with the same id.
    ///
    /// # Errors
    ///
    /// Backend failure.
    fn save_execution(&self, execution: &TaskExecution) -> Result<(), StoreError>;

    /// Record by id.
    ///
    /// # Errors
    ///
    /// Backend failure.
    fn get_execution(&self, id: &str) -> Result<Option<TaskExecution>, StoreError>;

    /// Up to `limit` records, most recently started first.
    ///
    /// # Errors
    ///
    /// Backend failure.
    fn recent_executions(&self, limit: usize) -> Result<Vec<TaskExecution>, StoreError>;

    /// Latest completed execution of `task` started at or after `since`.
    ///
    /// # Errors
    ///
    /// Backend failure.
    fn last_completed(
        &self,
        task: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<TaskExecution>, StoreError>;

    /// Append a system metrics row.
    ///
    /// # Errors
    ///
    /// Backend failure.
    fn record_metrics(&self, row: &SystemMetricsRecord) -> Result<(), StoreError>;

    /// Metrics rows at or after `since`, oldest first.
    ///
    /// # Errors
    ///
    /// Backend failure.
    fn metrics_history(&self, since: DateTime<Utc>) -> Result<Vec<SystemMetricsRecord>, StoreError>;

    /// Append a learning row.
    ///
    /// # Errors
    ///
    /// Backend failure.
    fn append_learning(&self, record: &AdaptiveLearningRecord) -> Result<(), StoreError>;

    /// Learning rows for `task` dated on or after `since`.
    ///
    /// # Errors
    ///
    /// Backend failure.
    fn learning_records(
        &self,
        task: &str,
        since: NaiveDate,
    ) -> Result<Vec<AdaptiveLearningRecord>, StoreError>;

    /// Drop metrics older than `metrics_before` and executions started before
    /// `executions_before`.
    ///
    /// # Errors
    ///
    /// Backend failure.
    fn prune(
        &self,
        metrics_before: DateTime<Utc>,
        executions_before: DateTime<Utc>,
    ) -> Result<PruneReport, StoreError>;
}
