//! Error types for orchestrator operations.

use std::time::Duration;

use thiserror::Error;

/// Errors produced by the registry, engine and scheduler.
///
/// `ConditionNotMet`, `DependencyNotSatisfied`, `Timeout` and `Handler` end up
/// on execution records; they are never thrown out of the dispatch loop.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OrchestratorError {
    /// No task definition is registered under this name.
    #[error("unknown task: {0}")]
    UnknownTask(String),
    /// A task definition already exists under this name.
    #[error("task already registered: {0}")]
    DuplicateTask(String),
    /// An admission condition rejected the execution.
    #[error("condition not met: {0}")]
    ConditionNotMet(String),
    /// A prerequisite task has no recent completed execution.
    #[error("dependency not satisfied: {0}")]
    DependencyNotSatisfied(String),
    /// The handler exceeded the task timeout.
    #[error("timeout after {}s", .0.as_secs())]
    Timeout(Duration),
    /// The handler returned an error.
    #[error("handler error: {0}")]
    Handler(String),
    /// A storage backend failed.
    #[error("persistence error: {0}")]
    Persistence(String),
    /// Schedule pattern could not be parsed.
    #[error("invalid schedule pattern `{pattern}`: {reason}")]
    InvalidPattern {
        /// Offending pattern.
        pattern: String,
        /// Why it was rejected.
        reason: String,
    },
    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The engine no longer accepts submissions.
    #[error("orchestrator is shutting down")]
    ShuttingDown,
    /// Anything else caught at the execution boundary.
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl OrchestratorError {
    /// Short machine-readable kind, stored alongside error messages.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::UnknownTask(_) => "unknown_task",
            Self::DuplicateTask(_) => "duplicate_task",
            Self::ConditionNotMet(_) => "condition_not_met",
            Self::DependencyNotSatisfied(_) => "dependency_not_satisfied",
            Self::Timeout(_) => "timeout",
            Self::Handler(_) => "handler_error",
            Self::Persistence(_) => "persistence_error",
            Self::InvalidPattern { .. } => "invalid_pattern",
            Self::InvalidConfig(_) => "invalid_config",
            Self::ShuttingDown => "shutting_down",
            Self::Unexpected(_) => "unexpected_error",
        }
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
