//! In-memory store.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::RwLock;

use crate::core::execution::{ExecutionStatus, TaskExecution};
use crate::core::learning::AdaptiveLearningRecord;
use crate::core::monitor::SystemMetricsRecord;

use super::{ExecutionStore, PruneReport, StoreError};

fn started(ex: &TaskExecution) -> DateTime<Utc> {
    ex.started_at.unwrap_or(ex.created_at)
}

/// Rows held by [`InMemoryStore`].
#[derive(Debug, Default)]
struct Tables {
    executions: HashMap<String, TaskExecution>,
    metrics: Vec<SystemMetricsRecord>,
    learning: Vec<AdaptiveLearningRecord>,
}

impl Tables {
    fn recent(&self, limit: usize) -> Vec<TaskExecution> {
        let mut rows: Vec<&TaskExecution> = self.executions.values().collect();
        rows.sort_by(|a, b| started(b).cmp(&started(a)).then_with(|| b.id.cmp(&a.id)));
        rows.into_iter().take(limit).cloned().collect()
    }

    fn last_completed(&self, task: &str, since: DateTime<Utc>) -> Option<TaskExecution> {
        self.executions
            .values()
            .filter(|e| {
                e.task_name == task
                    && e.status == ExecutionStatus::Completed
                    && e.started_at.is_some_and(|s| s >= since)
            })
            .max_by_key(|e| started(e))
            .cloned()
    }

    fn metrics_since(&self, since: DateTime<Utc>) -> Vec<SystemMetricsRecord> {
        let mut rows: Vec<_> = self
            .metrics
            .iter()
            .filter(|m| m.timestamp >= since)
            .cloned()
            .collect();
        rows.sort_by_key(|m| m.timestamp);
        rows
    }

    fn learning_for(&self, task: &str, since: NaiveDate) -> Vec<AdaptiveLearningRecord> {
        self.learning
            .iter()
            .filter(|r| r.task_type == task && r.date >= since)
            .cloned()
            .collect()
    }

    fn prune(
        &mut self,
        metrics_before: DateTime<Utc>,
        executions_before: DateTime<Utc>,
    ) -> PruneReport {
        let metrics = self.metrics.len();
        self.metrics.retain(|m| m.timestamp >= metrics_before);
        let executions = self.executions.len();
        self.executions.retain(|_, e| started(e) >= executions_before);
        PruneReport {
            metrics: metrics - self.metrics.len(),
            executions: executions - self.executions.len(),
        }
    }
}

/// Store keeping every table in memory behind one lock.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored execution records.
    pub fn execution_count(&self) -> usize {
        self.tables.read().executions.len()
    }

    /// Number of stored learning rows.
    pub fn learning_count(&self) -> usize {
        self.tables.read().learning.len()
    }
}

impl ExecutionStore for InMemoryStore {
    fn save_execution(&self, execution: &TaskExecution) -> Result<(), StoreError> {
        self.tables
            .write()
            .executions
            .insert(execution.id.clone(), execution.clone());
        Ok(())
    }

    fn get_execution(&self, id: &str) -> Result<Option<TaskExecution>, StoreError> {
        Ok(self.tables.read().executions.get(id).cloned())
    }

    fn recent_executions(&self, limit: usize) -> Result<Vec<TaskExecution>, StoreError> {
        Ok(self.tables.read().recent(limit))
    }

    fn last_completed(
        &self,
        task: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<TaskExecution>, StoreError> {
        Ok(self.tables.read().last_completed(task, since))
    }

    fn record_metrics(&self, row: &SystemMetricsRecord) -> Result<(), StoreError> {
        self.tables.write().metrics.push(row.clone());
        Ok(())
    }

    fn metrics_history(&self, since: DateTime<Utc>) -> Result<Vec<SystemMetricsRecord>, StoreError> {
        Ok(self.tables.read().metrics_since(since))
    }

    fn append_learning(&self, record: &AdaptiveLearningRecord) -> Result<(), StoreError> {
        self.tables.write().learning.push(record.clone());
        Ok(())
    }

    fn learning_records(
        &self,
        task: &str,
        since: NaiveDate,
    ) -> Result<Vec<AdaptiveLearningRecord>, StoreError> {
        Ok(self.tables.read().learning_for(task, since))
    }

    fn prune(
        &self,
        metrics_before: DateTime<Utc>,
        executions_before: DateTime<Utc>,
    ) -> Result<PruneReport, StoreError> {
        Ok(self.tables.write().prune(metrics_before, executions_before))
    }
}
