//! Execution records and their status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::core::error::OrchestratorError;
use crate::core::monitor::ResourceSnapshot;
use crate::core::task::{Priority, TaskArgs};

/// Lifecycle state of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    /// Submitted, waiting for a slot or for its conditions to be evaluated.
    Pending,
    /// Handler is executing.
    Running,
    /// Handler failed; waiting out the backoff before the next attempt.
    Retrying,
    /// Handler succeeded.
    Completed,
    /// Retries exhausted, timed out or broke unexpectedly.
    Failed,
    /// Rejected at admission; never ran.
    Cancelled,
}

impl ExecutionStatus {
    /// Completed, failed or cancelled.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether `self -> next` is a legal move.
    #[must_use]
    pub const fn can_transition(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running | Self::Cancelled | Self::Failed)
                | (Self::Running, Self::Completed | Self::Failed | Self::Retrying)
                | (Self::Retrying, Self::Running | Self::Failed)
        )
    }

    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Retrying => "retrying",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pre/post resource deltas for one execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    /// Change in CPU percent.
    pub cpu_delta: f64,
    /// Change in memory fraction.
    pub memory_delta: f64,
    /// Higher of the two CPU samples.
    pub peak_cpu: f64,
    /// Higher of the two memory samples.
    pub peak_memory: f64,
    /// Wall-clock seconds from first attempt to finish.
    pub duration_seconds: f64,
}

impl ResourceUsage {
    /// Compute deltas between two samples.
    #[must_use]
    pub fn between(pre: &ResourceSnapshot, post: &ResourceSnapshot, duration_seconds: f64) -> Self {
        Self {
            cpu_delta: post.cpu_percent - pre.cpu_percent,
            memory_delta: post.memory_fraction - pre.memory_fraction,
            peak_cpu: pre.cpu_percent.max(post.cpu_percent),
            peak_memory: pre.memory_fraction.max(post.memory_fraction),
            duration_seconds,
        }
    }
}

/// One concrete run of a task, retries included. Also the persisted record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskExecution {
    /// Unique id.
    pub id: String,
    /// Task this execution runs.
    pub task_name: String,
    /// Effective priority.
    pub priority: Priority,
    /// Current state.
    pub status: ExecutionStatus,
    /// Submission time.
    pub created_at: DateTime<Utc>,
    /// When the execution was admitted to a slot.
    pub started_at: Option<DateTime<Utc>>,
    /// When a terminal status was reached.
    pub completed_at: Option<DateTime<Utc>>,
    /// Seconds between start and completion.
    pub duration_seconds: Option<f64>,
    /// Handler output on success.
    pub result: Option<Value>,
    /// Last error message.
    pub error: Option<String>,
    /// Machine-readable kind of `error`.
    pub error_kind: Option<String>,
    /// Retries consumed so far.
    pub retry_count: u32,
    /// Resource deltas.
    pub resource_usage: Option<ResourceUsage>,
    /// Worker that ran the handler, when known.
    pub worker_id: Option<String>,
    /// Handler ignored cancellation after a timeout and was left running.
    #[serde(default)]
    pub detached: bool,
    /// Arguments passed at submission.
    #[serde(default)]
    pub args: TaskArgs,
}

impl TaskExecution {
    /// Fresh pending execution.
    #[must_use]
    pub fn new(
        task_name: impl Into<String>,
        priority: Priority,
        created_at: DateTime<Utc>,
        args: TaskArgs,
    ) -> Self {
        let task_name = task_name.into();
        Self {
            id: format!("exec_{}_{}", task_name, Uuid::new_v4().simple()),
            task_name,
            priority,
            status: ExecutionStatus::Pending,
            created_at,
            started_at: None,
            completed_at: None,
            duration_seconds: None,
            result: None,
            error: None,
            error_kind: None,
            retry_count: 0,
            resource_usage: None,
            worker_id: None,
            detached: false,
            args,
        }
    }

    /// Move to `next`, rejecting illegal transitions.
    ///
    /// # Errors
    ///
    /// Returns `Unexpected` when the state machine forbids the move.
    pub fn transition(&mut self, next: ExecutionStatus) -> Result<(), OrchestratorError> {
        if !self.status.can_transition(next) {
            return Err(OrchestratorError::Unexpected(format!(
                "illegal transition {} -> {} for {}",
                self.status, next, self.id
            )));
        }
        self.status = next;
        Ok(())
    }

    /// Attach an error and its kind.
    pub fn set_error(&mut self, err: &OrchestratorError) {
        self.error = Some(err.to_string());
        self.error_kind = Some(err.kind().to_owned());
    }

    /// Stamp completion time and duration.
    #[allow(clippy::cast_precision_loss)]
    pub fn finish_at(&mut self, at: DateTime<Utc>) {
        self.completed_at = Some(at);
        if let Some(started) = self.started_at {
            let millis = (at - started).num_milliseconds().max(0);
            self.duration_seconds = Some(millis as f64 / 1000.0);
        }
    }

    /// Compact view for history listings.
    #[must_use]
    pub fn summary(&self) -> ExecutionSummary {
        ExecutionSummary {
            id: self.id.clone(),
            task_name: self.task_name.clone(),
            status: self.status,
            priority: self.priority,
            started_at: self.started_at,
            completed_at: self.completed_at,
            duration_seconds: self.duration_seconds,
            retry_count: self.retry_count,
            error: self.error.clone(),
        }
    }
}

/// Persisted form of an execution.
pub type ExecutionRecord = TaskExecution;

/// Row returned by history queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    /// Execution id.
    pub id: String,
    /// Task name.
    pub task_name: String,
    /// Final status.
    pub status: ExecutionStatus,
    /// Effective priority.
    pub priority: Priority,
    /// Start time.
    pub started_at: Option<DateTime<Utc>>,
    /// Completion time.
    pub completed_at: Option<DateTime<Utc>>,
    /// Seconds taken.
    pub duration_seconds: Option<f64>,
    /// Retries consumed.
    pub retry_count: u32,
    /// Error text, if any.
    pub error: Option<String>,
}
