//! Configuration models for the orchestrator, scheduler and worker pools.

pub mod orchestrator;
pub mod worker_pool;

pub use orchestrator::{
    AdaptiveLearningConfig, OrchestratorConfig, ResourceLimits, ScalingBounds, ScheduleConfig,
    SchedulerSettings,
};
pub use worker_pool::WorkerPoolConfig;
