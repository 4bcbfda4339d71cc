//! Task model, execution engine, scheduler and health feedback loop.

pub mod audit;
pub mod capacity;
pub mod cron;
pub mod engine;
pub mod error;
pub mod execution;
pub mod health;
pub mod learning;
pub mod monitor;
pub mod queue;
pub mod registry;
pub mod scheduler;
pub mod task;

pub use audit::{build_audit_event, AuditAction, AuditEvent, AuditSink, InMemoryAuditSink};
pub use capacity::{Capacity, CapacitySnapshot};
pub use cron::{CronPattern, PatternKind};
pub use engine::{EngineParts, Orchestrator, ScheduleRequest};
pub use error::{AppResult, OrchestratorError};
pub use execution::{ExecutionRecord, ExecutionStatus, ExecutionSummary, ResourceUsage, TaskExecution};
pub use health::{HealthReport, Recommendation, ScaleDecision};
pub use learning::{AdaptiveLearningRecord, HourlyProfile, LearningContext};
pub use monitor::{
    AlertSource, NoAlerts, ResourceMonitor, ResourceProbe, ResourceSnapshot, StaticAlerts,
    StaticProbe, SystemMetricsRecord, SystemProbe,
};
pub use queue::ExecutionQueue;
pub use registry::{BuiltinTask, TaskRegistry};
pub use scheduler::{ScheduledTaskEntry, Scheduler, TickReport};
pub use task::{
    handler_fn, ConditionPolicy, FnHandler, HandlerContext, Priority, TaskArgs, TaskDefinition,
    TaskHandler,
};
