//! SQLite store with one table per record kind.
//!
//! Timestamps are rfc3339 text in UTC with nanosecond precision so that
//! lexical order matches time order. Nested values are JSON text columns.

use std::path::Path;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::core::execution::{ExecutionStatus, TaskExecution};
use crate::core::learning::AdaptiveLearningRecord;
use crate::core::monitor::SystemMetricsRecord;

use super::{ExecutionStore, PruneReport, StoreError};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS task_executions (
    id TEXT PRIMARY KEY,
    task_name TEXT NOT NULL,
    priority TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT,
    duration_seconds REAL,
    success_rate REAL,
    error_message TEXT,
    error_kind TEXT,
    retry_count INTEGER NOT NULL DEFAULT 0,
    resource_usage_json TEXT,
    worker_id TEXT,
    detached INTEGER NOT NULL DEFAULT 0,
    result_json TEXT,
    metadata_json TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_task_executions_task
    ON task_executions(task_name, status, started_at);

CREATE TABLE IF NOT EXISTS system_metrics (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    cpu REAL NOT NULL,
    memory REAL NOT NULL,
    disk REAL NOT NULL,
    network_json TEXT NOT NULL,
    active_tasks INTEGER NOT NULL,
    queue_size INTEGER NOT NULL,
    health_score REAL NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_system_metrics_timestamp ON system_metrics(timestamp);

CREATE TABLE IF NOT EXISTS adaptive_learning (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    date TEXT NOT NULL,
    hour INTEGER NOT NULL,
    task_type TEXT NOT NULL,
    success_rate REAL NOT NULL,
    avg_duration REAL NOT NULL,
    avg_cpu REAL NOT NULL,
    avg_memory REAL NOT NULL,
    context_json TEXT NOT NULL,
    recorded_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_adaptive_learning_task ON adaptive_learning(task_type, date);
";

const EXECUTION_SELECT: &str = "SELECT id, task_name, priority, status, created_at, started_at, \
     completed_at, duration_seconds, error_message, error_kind, retry_count, \
     resource_usage_json, worker_id, detached, result_json, metadata_json FROM task_executions";

/// Durable store backed by a single SQLite database.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and apply the schema.
    ///
    /// # Errors
    ///
    /// The parent directory or database cannot be created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        let store = Self::with_connection(conn)?;
        debug!(path = %path.display(), "store opened");
        Ok(store)
    }

    /// Private in-memory database, mostly for tests.
    ///
    /// # Errors
    ///
    /// SQLite could not allocate the database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Number of stored execution records.
    ///
    /// # Errors
    ///
    /// Backend failure.
    pub fn execution_count(&self) -> Result<usize, StoreError> {
        let n: i64 = self
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM task_executions", [], |r| r.get(0))?;
        Ok(usize::try_from(n).unwrap_or_default())
    }
}

fn stamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn limit_param(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn conversion<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn parse_time(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion(idx, e))
}

fn time_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    parse_time(idx, &row.get::<_, String>(idx)?)
}

fn opt_time_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    row.get::<_, Option<String>>(idx)?
        .map(|raw| parse_time(idx, &raw))
        .transpose()
}

fn json_at<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    serde_json::from_str(&row.get::<_, String>(idx)?).map_err(|e| conversion(idx, e))
}

fn opt_json_at<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>> {
    row.get::<_, Option<String>>(idx)?
        .map(|raw| serde_json::from_str(&raw).map_err(|e| conversion(idx, e)))
        .transpose()
}

// enums are stored by their lowercase serde name
fn label_at<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    serde_json::from_value(Value::String(row.get(idx)?)).map_err(|e| conversion(idx, e))
}

fn row_to_execution(row: &Row<'_>) -> rusqlite::Result<TaskExecution> {
    Ok(TaskExecution {
        id: row.get(0)?,
        task_name: row.get(1)?,
        priority: label_at(row, 2)?,
        status: label_at(row, 3)?,
        created_at: time_at(row, 4)?,
        started_at: opt_time_at(row, 5)?,
        completed_at: opt_time_at(row, 6)?,
        duration_seconds: row.get(7)?,
        result: opt_json_at(row, 14)?,
        error: row.get(8)?,
        error_kind: row.get(9)?,
        retry_count: row.get(10)?,
        resource_usage: opt_json_at(row, 11)?,
        worker_id: row.get(12)?,
        detached: row.get(13)?,
        args: json_at(row, 15)?,
    })
}

fn row_to_metrics(row: &Row<'_>) -> rusqlite::Result<SystemMetricsRecord> {
    Ok(SystemMetricsRecord {
        timestamp: time_at(row, 0)?,
        cpu_usage: row.get(1)?,
        memory_usage: row.get(2)?,
        disk_usage: row.get(3)?,
        network_io: json_at(row, 4)?,
        active_tasks: row.get(5)?,
        queue_size: row.get(6)?,
        health_score: row.get(7)?,
    })
}

fn row_to_learning(row: &Row<'_>) -> rusqlite::Result<AdaptiveLearningRecord> {
    let date: String = row.get(0)?;
    Ok(AdaptiveLearningRecord {
        date: NaiveDate::parse_from_str(&date, "%Y-%m-%d").map_err(|e| conversion(0, e))?,
        hour: row.get(1)?,
        task_type: row.get(2)?,
        success_rate: row.get(3)?,
        avg_duration: row.get(4)?,
        avg_cpu: row.get(5)?,
        avg_memory: row.get(6)?,
        context: json_at(row, 7)?,
        recorded_at: time_at(row, 8)?,
    })
}

fn success_rate(status: ExecutionStatus) -> Option<f64> {
    match status {
        ExecutionStatus::Completed => Some(1.0),
        ExecutionStatus::Failed | ExecutionStatus::Cancelled => Some(0.0),
        _ => None,
    }
}

impl ExecutionStore for SqliteStore {
    fn save_execution(&self, execution: &TaskExecution) -> Result<(), StoreError> {
        let resource_usage = execution
            .resource_usage
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let result = execution
            .result
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let metadata = serde_json::to_string(&execution.args)?;
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO task_executions (id, task_name, priority, status, \
             created_at, started_at, completed_at, duration_seconds, success_rate, \
             error_message, error_kind, retry_count, resource_usage_json, worker_id, \
             detached, result_json, metadata_json) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            params![
                execution.id,
                execution.task_name,
                execution.priority.as_str(),
                execution.status.as_str(),
                stamp(execution.created_at),
                execution.started_at.map(stamp),
                execution.completed_at.map(stamp),
                execution.duration_seconds,
                success_rate(execution.status),
                execution.error,
                execution.error_kind,
                execution.retry_count,
                resource_usage,
                execution.worker_id,
                execution.detached,
                result,
                metadata,
            ],
        )?;
        Ok(())
    }

    fn get_execution(&self, id: &str) -> Result<Option<TaskExecution>, StoreError> {
        let conn = self.conn.lock();
        let found = conn
            .query_row(
                &format!("{EXECUTION_SELECT} WHERE id = ?1"),
                params![id],
                row_to_execution,
            )
            .optional()?;
        Ok(found)
    }

    fn recent_executions(&self, limit: usize) -> Result<Vec<TaskExecution>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "{EXECUTION_SELECT} ORDER BY COALESCE(started_at, created_at) DESC, id DESC LIMIT ?1"
        ))?;
        let rows = stmt
            .query_map(params![limit_param(limit)], row_to_execution)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn last_completed(
        &self,
        task: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<TaskExecution>, StoreError> {
        let conn = self.conn.lock();
        let found = conn
            .query_row(
                &format!(
                    "{EXECUTION_SELECT} WHERE task_name = ?1 AND status = ?2 \
                     AND started_at IS NOT NULL AND started_at >= ?3 \
                     ORDER BY started_at DESC LIMIT 1"
                ),
                params![task, ExecutionStatus::Completed.as_str(), stamp(since)],
                row_to_execution,
            )
            .optional()?;
        Ok(found)
    }

    fn record_metrics(&self, row: &SystemMetricsRecord) -> Result<(), StoreError> {
        let network = serde_json::to_string(&row.network_io)?;
        self.conn.lock().execute(
            "INSERT INTO system_metrics (timestamp, cpu, memory, disk, network_json, \
             active_tasks, queue_size, health_score) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                stamp(row.timestamp),
                row.cpu_usage,
                row.memory_usage,
                row.disk_usage,
                network,
                row.active_tasks,
                row.queue_size,
                row.health_score,
            ],
        )?;
        Ok(())
    }

    fn metrics_history(&self, since: DateTime<Utc>) -> Result<Vec<SystemMetricsRecord>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT timestamp, cpu, memory, disk, network_json, active_tasks, queue_size, \
             health_score FROM system_metrics WHERE timestamp >= ?1 ORDER BY timestamp, id",
        )?;
        let rows = stmt
            .query_map(params![stamp(since)], row_to_metrics)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn append_learning(&self, record: &AdaptiveLearningRecord) -> Result<(), StoreError> {
        let context = serde_json::to_string(&record.context)?;
        self.conn.lock().execute(
            "INSERT INTO adaptive_learning (date, hour, task_type, success_rate, avg_duration, \
             avg_cpu, avg_memory, context_json, recorded_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.date.format("%Y-%m-%d").to_string(),
                record.hour,
                record.task_type,
                record.success_rate,
                record.avg_duration,
                record.avg_cpu,
                record.avg_memory,
                context,
                stamp(record.recorded_at),
            ],
        )?;
        Ok(())
    }

    fn learning_records(
        &self,
        task: &str,
        since: NaiveDate,
    ) -> Result<Vec<AdaptiveLearningRecord>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT date, hour, task_type, success_rate, avg_duration, avg_cpu, avg_memory, \
             context_json, recorded_at FROM adaptive_learning \
             WHERE task_type = ?1 AND date >= ?2 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(
                params![task, since.format("%Y-%m-%d").to_string()],
                row_to_learning,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn prune(
        &self,
        metrics_before: DateTime<Utc>,
        executions_before: DateTime<Utc>,
    ) -> Result<PruneReport, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let metrics = tx.execute(
            "DELETE FROM system_metrics WHERE timestamp < ?1",
            params![stamp(metrics_before)],
        )?;
        let executions = tx.execute(
            "DELETE FROM task_executions WHERE COALESCE(started_at, created_at) < ?1",
            params![stamp(executions_before)],
        )?;
        tx.commit()?;
        debug!(metrics, executions, "store pruned");
        Ok(PruneReport {
            metrics,
            executions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::execution::ResourceUsage;
    use crate::core::learning::LearningContext;
    use crate::core::monitor::NetworkIo;
    use crate::core::task::{Priority, TaskArgs};
    use serde_json::json;

    #[test]
    fn reopen_sees_latest_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orchestrator.db");
        let mut ex = TaskExecution::new("backup", Priority::High, Utc::now(), TaskArgs::new());
        ex.args.insert("target".into(), json!("/var/backups"));
        {
            let store = SqliteStore::open(&path).unwrap();
            store.save_execution(&ex).unwrap();
            ex.transition(ExecutionStatus::Running).unwrap();
            ex.started_at = Some(Utc::now());
            ex.transition(ExecutionStatus::Completed).unwrap();
            ex.finish_at(Utc::now());
            ex.result = Some(json!({"archived": 3}));
            ex.worker_id = Some("maintenance_worker_0".into());
            ex.resource_usage = Some(ResourceUsage {
                peak_cpu: 40.0,
                ..ResourceUsage::default()
            });
            store.save_execution(&ex).unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        let loaded = store.get_execution(&ex.id).unwrap().unwrap();
        assert_eq!(loaded, ex);
        assert_eq!(store.execution_count().unwrap(), 1);
        assert!(store.get_execution("exec_missing").unwrap().is_none());
    }

    #[test]
    fn last_completed_ignores_failures_and_old_runs() {
        let store = SqliteStore::open_in_memory().unwrap();
        let now = Utc::now();
        let mut old = TaskExecution::new("health_check", Priority::Medium, now, TaskArgs::new());
        old.status = ExecutionStatus::Completed;
        old.started_at = Some(now - chrono::Duration::hours(3));
        let mut failed = TaskExecution::new("health_check", Priority::Medium, now, TaskArgs::new());
        failed.status = ExecutionStatus::Failed;
        failed.started_at = Some(now);
        store.save_execution(&old).unwrap();
        store.save_execution(&failed).unwrap();

        let since = now - chrono::Duration::hours(1);
        assert!(store.last_completed("health_check", since).unwrap().is_none());

        let mut fresh = TaskExecution::new("health_check", Priority::Medium, now, TaskArgs::new());
        fresh.status = ExecutionStatus::Completed;
        fresh.started_at = Some(now - chrono::Duration::minutes(5));
        store.save_execution(&fresh).unwrap();
        let found = store.last_completed("health_check", since).unwrap().unwrap();
        assert_eq!(found.id, fresh.id);

        let recent = store.recent_executions(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, failed.id);
    }

    #[test]
    fn metrics_and_learning_filter_by_time() {
        let store = SqliteStore::open_in_memory().unwrap();
        let now = Utc::now();
        for age in [30, 2] {
            store
                .record_metrics(&SystemMetricsRecord {
                    timestamp: now - chrono::Duration::days(age),
                    cpu_usage: 12.5,
                    memory_usage: 0.4,
                    disk_usage: 0.7,
                    network_io: NetworkIo {
                        bytes_sent: 10,
                        bytes_recv: 20,
                    },
                    active_tasks: 1,
                    queue_size: 0,
                    health_score: 0.9,
                })
                .unwrap();
        }
        let rows = store.metrics_history(now - chrono::Duration::days(7)).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].network_io.bytes_recv, 20);

        let today = now.date_naive();
        for (task, date) in [
            ("quick_scan", today),
            ("quick_scan", today - chrono::Duration::days(10)),
            ("full_scan", today),
        ] {
            store
                .append_learning(&AdaptiveLearningRecord {
                    date,
                    hour: 9,
                    task_type: task.into(),
                    success_rate: 1.0,
                    avg_duration: 4.0,
                    avg_cpu: 30.0,
                    avg_memory: 0.5,
                    context: LearningContext {
                        system_load: 30.0,
                        available_memory: 8.0,
                        retry_count: 0,
                    },
                    recorded_at: now,
                })
                .unwrap();
        }
        let rows = store
            .learning_records("quick_scan", today - chrono::Duration::days(7))
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].hour, 9);

        let report = store
            .prune(now - chrono::Duration::days(7), now - chrono::Duration::days(7))
            .unwrap();
        assert_eq!(report.metrics, 1);
        assert_eq!(report.executions, 0);
    }
}
