//! One pool per worker type, with a combined status view.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{PoolStats, WorkKind, WorkerError, WorkerPool, WorkerStatus, WorkerType};

/// Type-erased view of a [`WorkerPool`].
pub trait WorkerGroup: Send + Sync {
    /// Family served by the pool.
    fn worker_type(&self) -> WorkerType;
    /// Pool counters.
    fn stats(&self) -> PoolStats;
    /// Per-worker status.
    fn worker_statuses(&self) -> Vec<WorkerStatus>;
    /// Stop the pool.
    fn shutdown(&self);
}

impl<K: WorkKind> WorkerGroup for WorkerPool<K> {
    fn worker_type(&self) -> WorkerType {
        K::WORKER_TYPE
    }

    fn stats(&self) -> PoolStats {
        Self::stats(self)
    }

    fn worker_statuses(&self) -> Vec<WorkerStatus> {
        Self::worker_statuses(self)
    }

    fn shutdown(&self) {
        Self::shutdown(self);
    }
}

/// Roll-up across all pools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerStatus {
    /// Registered pools.
    pub registered_pools: usize,
    /// Workers across all pools.
    pub total_workers: usize,
    /// Items finished, successful or not.
    pub total_tasks_processed: u64,
    /// Items that failed.
    pub failed_tasks: u64,
    /// Successful over processed; 1.0 before the first item.
    pub success_rate: f64,
    /// Per-pool counters.
    pub pools: Vec<PoolStats>,
    /// Per-worker status.
    pub workers: Vec<WorkerStatus>,
}

/// Owns the pools.
#[derive(Default)]
pub struct WorkerManager {
    groups: RwLock<Vec<Arc<dyn WorkerGroup>>>,
}

impl std::fmt::Debug for WorkerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let types: Vec<WorkerType> = self.groups.read().iter().map(|g| g.worker_type()).collect();
        f.debug_struct("WorkerManager").field("pools", &types).finish()
    }
}

impl WorkerManager {
    /// Manager with no pools.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the pool for its worker type.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` when a pool of that type is already registered.
    pub fn register(&self, group: Arc<dyn WorkerGroup>) -> Result<(), WorkerError> {
        let worker_type = group.worker_type();
        let mut groups = self.groups.write();
        if groups.iter().any(|g| g.worker_type() == worker_type) {
            return Err(WorkerError::InvalidConfig(format!(
                "a {worker_type} pool is already registered"
            )));
        }
        info!(worker_type = %worker_type, workers = group.stats().worker_count, "worker pool registered");
        groups.push(group);
        Ok(())
    }

    /// Pool for `worker_type`.
    #[must_use]
    pub fn get(&self, worker_type: WorkerType) -> Option<Arc<dyn WorkerGroup>> {
        self.groups
            .read()
            .iter()
            .find(|g| g.worker_type() == worker_type)
            .cloned()
    }

    /// Combined status.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn status(&self) -> ManagerStatus {
        let groups = self.groups.read();
        let pools: Vec<PoolStats> = groups.iter().map(|g| g.stats()).collect();
        let workers: Vec<WorkerStatus> = groups.iter().flat_map(|g| g.worker_statuses()).collect();
        let failed: u64 = pools.iter().map(|p| p.failed_tasks).sum();
        let processed: u64 = pools.iter().map(|p| p.completed_tasks).sum::<u64>() + failed;
        ManagerStatus {
            registered_pools: groups.len(),
            total_workers: workers.len(),
            total_tasks_processed: processed,
            failed_tasks: failed,
            success_rate: if processed == 0 {
                1.0
            } else {
                (processed - failed) as f64 / processed as f64
            },
            pools,
            workers,
        }
    }

    /// Shut down every pool.
    pub fn shutdown(&self) {
        for group in self.groups.read().iter() {
            group.shutdown();
        }
        info!("worker manager stopped");
    }
}
