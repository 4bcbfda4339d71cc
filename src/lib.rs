//! # Scan Orchestrator
//!
//! Task orchestration for the scanning platform: decides when recurring and
//! ad-hoc operational tasks run, whether it is currently safe to run them,
//! how many run at once, what happens when they fail, and how capacity
//! follows observed system health.
//!
//! ## Components
//!
//! - **Task registry**: named definitions with a handler, priority, timeout,
//!   retry ceiling, prerequisites and admission conditions.
//! - **Execution engine** ([`core::Orchestrator`]): a priority queue drained
//!   by one dispatch loop into a bounded number of slots. Each execution is
//!   gated on conditions and dependencies, retried with exponential backoff,
//!   and persisted exactly once when it reaches a terminal status.
//! - **Scheduler** ([`core::Scheduler`]): evaluates a narrow cron-like
//!   grammar on a fixed tick and submits due tasks to the engine.
//! - **Health monitor**: scores resource headroom and recent failures, and
//!   moves the concurrency ceiling one step at a time.
//! - **Workers** ([`workers`]): typed scan, alert and report workers on
//!   dedicated threads, exposed to the engine as task handlers.
//! - **Stores** ([`infra::store`]): execution history, system metrics and
//!   adaptive-learning rows, in memory or in SQLite.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use scan_orchestrator::builders::OrchestratorBuilder;
//! use scan_orchestrator::config::OrchestratorConfig;
//! use scan_orchestrator::core::{handler_fn, ScheduleRequest, Scheduler, TaskDefinition};
//!
//! let config = OrchestratorConfig::from_env()?;
//! let engine = OrchestratorBuilder::new(config.clone())
//!     .task(TaskDefinition::new("cleanup", handler_fn(|_| async { Ok(serde_json::Value::Null) })))
//!     .build()?;
//! engine.start()?;
//!
//! let scheduler = Scheduler::new(engine.clone(), &config.scheduler)?;
//! scheduler.start()?;
//!
//! let id = engine.schedule(ScheduleRequest::new("cleanup"))?;
//! let record = engine.wait_for(&id, Duration::from_secs(30)).await;
//!
//! scheduler.stop().await;
//! engine.shutdown(Duration::from_secs(10)).await;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Builders that assemble the engine.
pub mod builders;
/// Configuration models and loaders.
pub mod config;
/// Task model, engine, scheduler and health loop.
pub mod core;
/// Storage backends.
pub mod infra;
/// Query models served to dashboards and CLIs.
pub mod runtime;
/// Clock and tracing helpers.
pub mod util;
/// Typed workers and worker pools.
pub mod workers;

pub use crate::builders::OrchestratorBuilder;
pub use crate::config::OrchestratorConfig;
pub use crate::core::{Orchestrator, OrchestratorError, ScheduleRequest, Scheduler};
