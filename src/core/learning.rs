//! Adaptive learning records and their hourly aggregation.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::core::execution::{ExecutionStatus, TaskExecution};
use crate::core::monitor::ResourceSnapshot;

/// Conditions at the time an execution finished.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LearningContext {
    /// CPU percent.
    pub system_load: f64,
    /// Available memory in GB.
    pub available_memory: f64,
    /// Retries the execution consumed.
    pub retry_count: u32,
}

/// One append-only learning row per finished execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveLearningRecord {
    /// Local date of the start.
    pub date: NaiveDate,
    /// Local hour of the start.
    pub hour: u32,
    /// Task name.
    pub task_type: String,
    /// 1.0 when the execution completed, else 0.0.
    pub success_rate: f64,
    /// Seconds taken.
    pub avg_duration: f64,
    /// Peak CPU percent seen around the run.
    pub avg_cpu: f64,
    /// Peak memory fraction seen around the run.
    pub avg_memory: f64,
    /// Snapshot context.
    pub context: LearningContext,
    /// Insert time.
    pub recorded_at: DateTime<Utc>,
}

impl AdaptiveLearningRecord {
    /// Build the record for a finished execution started at `local_start`.
    #[must_use]
    pub fn from_execution(
        execution: &TaskExecution,
        local_start: NaiveDateTime,
        snapshot: &ResourceSnapshot,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        let usage = execution.resource_usage.unwrap_or_default();
        Self {
            date: local_start.date(),
            hour: local_start.hour(),
            task_type: execution.task_name.clone(),
            success_rate: if execution.status == ExecutionStatus::Completed {
                1.0
            } else {
                0.0
            },
            avg_duration: execution.duration_seconds.unwrap_or(0.0),
            avg_cpu: usage.peak_cpu,
            avg_memory: usage.peak_memory,
            context: LearningContext {
                system_load: snapshot.cpu_percent,
                available_memory: snapshot.available_memory_gb,
                retry_count: execution.retry_count,
            },
            recorded_at,
        }
    }
}

/// Aggregate over all records for one hour of the day.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HourlyProfile {
    /// Hour of day.
    pub hour: u32,
    /// Records aggregated.
    pub runs: usize,
    /// Mean success rate.
    pub success_rate: f64,
    /// Mean duration in seconds.
    pub avg_duration: f64,
    /// Mean peak CPU percent.
    pub avg_cpu: f64,
}

/// Group records by hour, sorted by hour.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn hourly_profile(records: &[AdaptiveLearningRecord]) -> Vec<HourlyProfile> {
    let mut buckets: BTreeMap<u32, (usize, f64, f64, f64)> = BTreeMap::new();
    for r in records {
        let b = buckets.entry(r.hour).or_default();
        b.0 += 1;
        b.1 += r.success_rate;
        b.2 += r.avg_duration;
        b.3 += r.avg_cpu;
    }
    buckets
        .into_iter()
        .map(|(hour, (runs, success, duration, cpu))| {
            let n = runs as f64;
            HourlyProfile {
                hour,
                runs,
                success_rate: success / n,
                avg_duration: duration / n,
                avg_cpu: cpu / n,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::task::{Priority, TaskArgs};

    fn record(hour: u32, ok: bool, secs: f64) -> AdaptiveLearningRecord {
        let mut ex = TaskExecution::new("quick_scan", Priority::Medium, Utc::now(), TaskArgs::new());
        ex.status = if ok {
            ExecutionStatus::Completed
        } else {
            ExecutionStatus::Failed
        };
        ex.duration_seconds = Some(secs);
        let start = NaiveDate::from_ymd_opt(2024, 6, 3)
            .unwrap()
            .and_hms_opt(hour, 10, 0)
            .unwrap();
        AdaptiveLearningRecord::from_execution(&ex, start, &ResourceSnapshot::idle(), Utc::now())
    }

    #[test]
    fn record_keys_on_start_hour() {
        let r = record(14, true, 3.0);
        assert_eq!(r.hour, 14);
        assert!((r.success_rate - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn profile_groups_by_hour() {
        let records = vec![record(2, true, 10.0), record(2, false, 20.0), record(9, true, 1.0)];
        let profile = hourly_profile(&records);
        assert_eq!(profile.len(), 2);
        assert_eq!(profile[0].hour, 2);
        assert_eq!(profile[0].runs, 2);
        assert!((profile[0].success_rate - 0.5).abs() < 1e-9);
        assert!((profile[0].avg_duration - 15.0).abs() < 1e-9);
    }
}
