//! Resource sampling: snapshots, probes, critical-alert sources.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use sysinfo::{Disks, Networks, System, MINIMUM_CPU_UPDATE_INTERVAL};
use tracing::{debug, error};

/// Point-in-time view of host resources.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    /// CPU usage in percent (0-100).
    pub cpu_percent: f64,
    /// Used memory as a fraction of total.
    pub memory_fraction: f64,
    /// Used disk space as a fraction of total.
    pub disk_fraction: f64,
    /// Available memory in gigabytes.
    pub available_memory_gb: f64,
    /// Cumulative bytes sent across interfaces.
    pub network_bytes_sent: u64,
    /// Cumulative bytes received across interfaces.
    pub network_bytes_recv: u64,
    /// When the sample was taken.
    pub timestamp: DateTime<Utc>,
}

impl ResourceSnapshot {
    /// Snapshot with the given load figures and zeroed counters.
    #[must_use]
    pub fn new(cpu_percent: f64, memory_fraction: f64, disk_fraction: f64) -> Self {
        Self {
            cpu_percent,
            memory_fraction,
            disk_fraction,
            available_memory_gb: 0.0,
            network_bytes_sent: 0,
            network_bytes_recv: 0,
            timestamp: Utc::now(),
        }
    }

    /// All-zero snapshot, used when sampling fails.
    #[must_use]
    pub fn idle() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    /// CPU usage as a fraction.
    #[must_use]
    pub fn cpu_fraction(&self) -> f64 {
        self.cpu_percent / 100.0
    }
}

/// Source of resource snapshots.
pub trait ResourceProbe: Send + Sync {
    /// Take one sample.
    ///
    /// # Errors
    ///
    /// Returns an error when the host cannot be queried.
    fn sample(&self) -> anyhow::Result<ResourceSnapshot>;
}

/// CPU reading refreshed at most once per `min_interval`.
///
/// `sysinfo` computes usage from the delta between two refreshes, so reading
/// again sooner than [`sysinfo::MINIMUM_CPU_UPDATE_INTERVAL`] yields noise.
#[derive(Debug)]
struct CpuGauge {
    min_interval: Duration,
    last: (Instant, f64),
}

impl CpuGauge {
    const fn new(min_interval: Duration, primed_at: Instant) -> Self {
        Self {
            min_interval,
            last: (primed_at, 0.0),
        }
    }

    fn read(&mut self, now: Instant, refresh: impl FnOnce() -> f64) -> f64 {
        let (at, value) = self.last;
        if now.saturating_duration_since(at) < self.min_interval {
            return value;
        }
        let value = refresh();
        self.last = (now, value);
        value
    }
}

struct HostState {
    system: System,
    cpu: CpuGauge,
}

/// Host probe backed by `sysinfo`.
pub struct SystemProbe {
    state: Mutex<HostState>,
}

impl SystemProbe {
    /// Create a probe and prime the CPU counters.
    #[must_use]
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        system.refresh_memory();
        Self {
            state: Mutex::new(HostState {
                system,
                cpu: CpuGauge::new(MINIMUM_CPU_UPDATE_INTERVAL, Instant::now()),
            }),
        }
    }
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(clippy::cast_precision_loss)]
fn ratio(used: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        used as f64 / total as f64
    }
}

impl ResourceProbe for SystemProbe {
    #[allow(clippy::cast_precision_loss)]
    fn sample(&self) -> anyhow::Result<ResourceSnapshot> {
        let (cpu_percent, memory_fraction, available_memory_gb) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let cpu = state.cpu.read(Instant::now(), || {
                state.system.refresh_cpu_usage();
                f64::from(state.system.global_cpu_usage())
            });
            let system = &mut state.system;
            system.refresh_memory();
            let total = system.total_memory();
            if total == 0 {
                anyhow::bail!("host reported zero total memory");
            }
            (
                cpu,
                ratio(system.used_memory(), total),
                system.available_memory() as f64 / 1024.0_f64.powi(3),
            )
        };

        let disks = Disks::new_with_refreshed_list();
        let root = disks
            .list()
            .iter()
            .find(|d| d.mount_point() == Path::new("/"));
        let disk_fraction = match root {
            Some(disk) => ratio(
                disk.total_space().saturating_sub(disk.available_space()),
                disk.total_space(),
            ),
            None => {
                let (total, available) = disks.list().iter().fold((0u64, 0u64), |acc, d| {
                    (acc.0 + d.total_space(), acc.1 + d.available_space())
                });
                ratio(total.saturating_sub(available), total)
            }
        };

        let networks = Networks::new_with_refreshed_list();
        let (sent, recv) = networks.list().values().fold((0u64, 0u64), |acc, data| {
            (
                acc.0.saturating_add(data.total_transmitted()),
                acc.1.saturating_add(data.total_received()),
            )
        });

        Ok(ResourceSnapshot {
            cpu_percent,
            memory_fraction,
            disk_fraction,
            available_memory_gb,
            network_bytes_sent: sent,
            network_bytes_recv: recv,
            timestamp: Utc::now(),
        })
    }
}

/// Probe returning a settable snapshot. Used by tests and simulations.
pub struct StaticProbe {
    snapshot: Mutex<ResourceSnapshot>,
}

impl StaticProbe {
    /// Probe that always reports `snapshot`.
    #[must_use]
    pub fn new(snapshot: ResourceSnapshot) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
        }
    }

    /// Replace the reported snapshot.
    pub fn set(&self, snapshot: ResourceSnapshot) {
        *self.snapshot.lock() = snapshot;
    }

    /// Change only the CPU figure.
    pub fn set_cpu(&self, cpu_percent: f64) {
        self.snapshot.lock().cpu_percent = cpu_percent;
    }
}

impl Default for StaticProbe {
    fn default() -> Self {
        Self::new(ResourceSnapshot::new(10.0, 0.3, 0.4))
    }
}

impl ResourceProbe for StaticProbe {
    fn sample(&self) -> anyhow::Result<ResourceSnapshot> {
        let mut snapshot = *self.snapshot.lock();
        snapshot.timestamp = Utc::now();
        Ok(snapshot)
    }
}

/// Count of outstanding critical alerts, fed by the alerting subsystem.
pub trait AlertSource: Send + Sync {
    /// Current number of unresolved critical alerts.
    ///
    /// # Errors
    ///
    /// Returns an error when the alert store cannot be read.
    fn critical_alerts(&self) -> anyhow::Result<u32>;
}

/// Alert source that never reports anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAlerts;

impl AlertSource for NoAlerts {
    fn critical_alerts(&self) -> anyhow::Result<u32> {
        Ok(0)
    }
}

/// Alert source with a settable counter.
#[derive(Debug, Default)]
pub struct StaticAlerts {
    count: AtomicU32,
}

impl StaticAlerts {
    /// Start at `count`.
    #[must_use]
    pub const fn new(count: u32) -> Self {
        Self {
            count: AtomicU32::new(count),
        }
    }

    /// Replace the counter.
    pub fn set(&self, count: u32) {
        self.count.store(count, Ordering::Relaxed);
    }
}

impl AlertSource for StaticAlerts {
    fn critical_alerts(&self) -> anyhow::Result<u32> {
        Ok(self.count.load(Ordering::Relaxed))
    }
}

/// Default number of snapshots kept in memory.
pub const DEFAULT_HISTORY_SIZE: usize = 100;

/// Wraps a probe and remembers recent samples.
pub struct ResourceMonitor {
    probe: Arc<dyn ResourceProbe>,
    last: RwLock<Option<ResourceSnapshot>>,
    history: Mutex<VecDeque<ResourceSnapshot>>,
    history_size: usize,
}

impl ResourceMonitor {
    /// Monitor over `probe`, keeping `history_size` samples.
    pub fn new(probe: Arc<dyn ResourceProbe>, history_size: usize) -> Self {
        Self {
            probe,
            last: RwLock::new(None),
            history: Mutex::new(VecDeque::with_capacity(history_size.min(1024))),
            history_size: history_size.max(1),
        }
    }

    /// Take a fresh sample. A failing probe is logged and reported as idle.
    pub fn sample(&self) -> ResourceSnapshot {
        let snapshot = match self.probe.sample() {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "resource sampling failed; reporting idle snapshot");
                ResourceSnapshot::idle()
            }
        };
        debug!(
            cpu = snapshot.cpu_percent,
            memory = snapshot.memory_fraction,
            disk = snapshot.disk_fraction,
            "resource sample"
        );
        *self.last.write() = Some(snapshot);
        let mut history = self.history.lock();
        if history.len() >= self.history_size {
            history.pop_front();
        }
        history.push_back(snapshot);
        snapshot
    }

    /// Most recent sample, if any.
    pub fn last(&self) -> Option<ResourceSnapshot> {
        *self.last.read()
    }

    /// Retained samples, oldest first.
    pub fn history(&self) -> Vec<ResourceSnapshot> {
        self.history.lock().iter().copied().collect()
    }
}

/// Persisted per-tick system metrics row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemMetricsRecord {
    /// Sample time.
    pub timestamp: DateTime<Utc>,
    /// CPU percent.
    pub cpu_usage: f64,
    /// Memory fraction.
    pub memory_usage: f64,
    /// Disk fraction.
    pub disk_usage: f64,
    /// Network counters.
    pub network_io: NetworkIo,
    /// Executions holding a slot.
    pub active_tasks: usize,
    /// Executions waiting for a slot.
    pub queue_size: usize,
    /// Score computed on this tick.
    pub health_score: f64,
}

/// Network byte counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkIo {
    /// Bytes sent.
    pub bytes_sent: u64,
    /// Bytes received.
    pub bytes_recv: u64,
}

impl SystemMetricsRecord {
    /// Build a row from a snapshot and engine counters.
    #[must_use]
    pub const fn from_snapshot(
        snapshot: &ResourceSnapshot,
        active_tasks: usize,
        queue_size: usize,
        health_score: f64,
    ) -> Self {
        Self {
            timestamp: snapshot.timestamp,
            cpu_usage: snapshot.cpu_percent,
            memory_usage: snapshot.memory_fraction,
            disk_usage: snapshot.disk_fraction,
            network_io: NetworkIo {
                bytes_sent: snapshot.network_bytes_sent,
                bytes_recv: snapshot.network_bytes_recv,
            },
            active_tasks,
            queue_size,
            health_score,
        }
    }
}
