//! Query surface consumed by dashboards and CLIs.

pub mod api;

pub use api::{DueEntry, EngineStatus, MetricsSnapshot, ScheduleEntryStatus, SchedulerStatus};
