//! Health score, advisories and the auto-scale rule.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ScalingBounds;
use crate::core::execution::ExecutionStatus;
use crate::core::monitor::ResourceSnapshot;

/// Executions considered for the failure penalty.
pub const FAILURE_WINDOW: usize = 10;
/// Weight of the failure ratio.
pub const FAILURE_PENALTY: f64 = 0.3;

fn headroom(used_fraction: f64) -> f64 {
    // NaN falls to 0 through max()
    (1.0 - used_fraction).max(0.0).min(1.0)
}

/// Score in `[0, 1]` from resource headroom minus a recent-failure penalty.
///
/// `recent` holds terminal statuses, oldest first; only the last
/// [`FAILURE_WINDOW`] count.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn health_score(snapshot: &ResourceSnapshot, recent: &[ExecutionStatus]) -> f64 {
    let base = (headroom(snapshot.cpu_fraction())
        + headroom(snapshot.memory_fraction)
        + headroom(snapshot.disk_fraction))
        / 3.0;

    let window = &recent[recent.len().saturating_sub(FAILURE_WINDOW)..];
    let penalty = if window.is_empty() {
        0.0
    } else {
        let failed = window
            .iter()
            .filter(|s| **s == ExecutionStatus::Failed)
            .count();
        failed as f64 / window.len() as f64 * FAILURE_PENALTY
    };

    (base - penalty).clamp(0.0, 1.0)
}

/// Observability-only advisory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    /// CPU above 80%.
    CpuCritical,
    /// Memory above 85%.
    MemoryHigh,
    /// Disk above 90%.
    DiskCritical,
    /// Score below 0.5.
    HealthDegraded,
    /// Work queued but nothing running.
    QueueStalled,
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::CpuCritical => "CPU usage critical - consider reducing concurrent tasks",
            Self::MemoryHigh => "High memory usage - consider memory optimization",
            Self::DiskCritical => "Disk space critical - cleanup required",
            Self::HealthDegraded => "System health degraded - reducing task load",
            Self::QueueStalled => "Tasks queued but none running - check task execution",
        })
    }
}

/// Advisories for the current state.
#[must_use]
pub fn recommendations(
    snapshot: &ResourceSnapshot,
    score: f64,
    running: usize,
    queued: usize,
) -> Vec<Recommendation> {
    let mut out = Vec::new();
    if snapshot.cpu_percent > 80.0 {
        out.push(Recommendation::CpuCritical);
    }
    if snapshot.memory_fraction > 0.85 {
        out.push(Recommendation::MemoryHigh);
    }
    if snapshot.disk_fraction > 0.9 {
        out.push(Recommendation::DiskCritical);
    }
    if score < 0.5 {
        out.push(Recommendation::HealthDegraded);
    }
    if running == 0 && queued > 0 {
        out.push(Recommendation::QueueStalled);
    }
    out
}

/// Outcome of one auto-scale evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ScaleDecision {
    /// Raise the ceiling.
    Up {
        /// Previous ceiling.
        from: usize,
        /// New ceiling.
        to: usize,
    },
    /// Lower the ceiling.
    Down {
        /// Previous ceiling.
        from: usize,
        /// New ceiling.
        to: usize,
    },
    /// Leave it alone.
    Hold,
}

/// Grow by one when healthy and backlogged, shrink by one under pressure.
#[must_use]
pub fn scale_decision(
    score: f64,
    snapshot: &ResourceSnapshot,
    queued: usize,
    current: usize,
    bounds: ScalingBounds,
) -> ScaleDecision {
    let grow = score > 0.7
        && queued > current
        && snapshot.cpu_percent < 60.0
        && snapshot.memory_fraction < 0.7;
    if grow {
        let to = (current + 1).min(bounds.max_concurrent);
        if to > current {
            return ScaleDecision::Up { from: current, to };
        }
        return ScaleDecision::Hold;
    }

    let shrink = score < 0.4 || snapshot.cpu_percent > 80.0 || snapshot.memory_fraction > 0.8;
    if shrink {
        let to = current.saturating_sub(1).max(bounds.min_concurrent);
        if to < current {
            return ScaleDecision::Down { from: current, to };
        }
    }
    ScaleDecision::Hold
}

/// Result of one health-monitor tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Tick time.
    pub timestamp: DateTime<Utc>,
    /// Snapshot the score came from.
    pub snapshot: ResourceSnapshot,
    /// Score in `[0, 1]`.
    pub score: f64,
    /// Advisories.
    pub recommendations: Vec<Recommendation>,
    /// Slots held at tick time.
    pub running: usize,
    /// Queue length at tick time.
    pub queued: usize,
    /// What auto-scaling did.
    pub scale: ScaleDecision,
}
