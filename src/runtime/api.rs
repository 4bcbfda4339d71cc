//! Read-only query models served to the dashboard and CLI.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::health::Recommendation;
use crate::core::monitor::ResourceSnapshot;
use crate::core::task::Priority;

/// Engine status snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStatus {
    /// Dispatch and health loops are active.
    pub is_running: bool,
    /// Executions holding a concurrency slot.
    pub active_tasks: usize,
    /// Executions whose handler is currently executing.
    pub running_executions: usize,
    /// Executions waiting for a slot.
    pub queue_size: usize,
    /// Registered task names.
    pub registered_tasks: Vec<String>,
    /// Effective concurrency ceiling.
    pub max_concurrent_tasks: usize,
    /// Requested ceiling (lower while a decrease drains).
    pub target_concurrent_tasks: usize,
    /// Last resource sample.
    pub system_metrics: Option<ResourceSnapshot>,
    /// Last health-monitor tick.
    pub last_health_check: Option<DateTime<Utc>>,
    /// Score from the last tick.
    pub health_score: Option<f64>,
    /// Advisories from the last tick.
    pub recommendations: Vec<Recommendation>,
    /// Learning records are being collected.
    pub adaptive_learning_enabled: bool,
}

/// Aggregate execution metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Executions holding a slot.
    pub running: usize,
    /// Executions waiting for a slot.
    pub queued: usize,
    /// Completed since midnight UTC.
    pub completed_today: usize,
    /// Failed since midnight UTC.
    pub failed_today: usize,
    /// Cancelled since midnight UTC.
    pub cancelled_today: usize,
    /// Mean duration of completed executions, in seconds.
    pub average_duration_seconds: f64,
    /// Completed over every finished execution, cancellations included;
    /// 1.0 with no data.
    pub success_rate: f64,
    /// Score from the last health tick.
    pub health_score: Option<f64>,
    /// Executions whose handler ignored cancellation.
    pub orphaned_executions: u64,
    /// Effective concurrency ceiling.
    pub max_concurrent_tasks: usize,
}

/// Projected fire time of a schedule entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DueEntry {
    /// Task to submit.
    pub task_name: String,
    /// Local fire time.
    pub next_run: NaiveDateTime,
    /// Source pattern.
    pub pattern: String,
    /// Priority override, if any.
    pub priority: Option<Priority>,
}

/// Per-entry scheduler statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntryStatus {
    /// Entry id.
    pub id: String,
    /// Task name.
    pub task_name: String,
    /// Pattern text.
    pub pattern: String,
    /// Whether the pattern is in the supported grammar.
    pub supported: bool,
    /// Enabled flag.
    pub enabled: bool,
    /// Successful submissions.
    pub run_count: u64,
    /// Last submission.
    pub last_run: Option<DateTime<Utc>>,
    /// Next projected fire time.
    pub next_run: Option<NaiveDateTime>,
}

/// Scheduler status snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStatus {
    /// Tick loop is active.
    pub is_running: bool,
    /// All entries.
    pub total_entries: usize,
    /// Enabled entries.
    pub enabled_entries: usize,
    /// Submissions made by ticks.
    pub scheduled_submissions: u64,
    /// Submissions made through manual triggers.
    pub manual_submissions: u64,
    /// Upcoming fire times.
    pub next_runs: Vec<DueEntry>,
}
