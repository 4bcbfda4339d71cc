//! Assemble an [`Orchestrator`] from configuration and optional collaborators.

use std::sync::Arc;

use crate::config::OrchestratorConfig;
use crate::core::audit::AuditSink;
use crate::core::engine::{EngineParts, Orchestrator};
use crate::core::error::OrchestratorError;
use crate::core::monitor::{
    AlertSource, NoAlerts, ResourceMonitor, ResourceProbe, SystemProbe, DEFAULT_HISTORY_SIZE,
};
use crate::core::registry::TaskRegistry;
use crate::core::task::TaskDefinition;
use crate::infra::store::{ExecutionStore, InMemoryStore};
use crate::util::clock::{Clock, SystemClock};

/// Builder for [`Orchestrator`]. Unset collaborators fall back to the
/// in-memory store, the sysinfo probe, no alerts and the system clock.
#[derive(Default)]
pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
    registry: TaskRegistry,
    pending: Vec<TaskDefinition>,
    store: Option<Arc<dyn ExecutionStore>>,
    probe: Option<Arc<dyn ResourceProbe>>,
    alerts: Option<Arc<dyn AlertSource>>,
    clock: Option<Arc<dyn Clock>>,
    audit: Option<Arc<dyn AuditSink>>,
    history_size: Option<usize>,
}

impl OrchestratorBuilder {
    /// Builder with `config`.
    #[must_use]
    pub fn new(config: OrchestratorConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Start from an existing registry.
    #[must_use]
    pub fn registry(mut self, registry: TaskRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Add one task definition; duplicates are reported by [`Self::build`].
    #[must_use]
    pub fn task(mut self, definition: TaskDefinition) -> Self {
        self.pending.push(definition);
        self
    }

    /// Persistence backend.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn ExecutionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Resource probe.
    #[must_use]
    pub fn probe(mut self, probe: Arc<dyn ResourceProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Critical alert counter.
    #[must_use]
    pub fn alerts(mut self, alerts: Arc<dyn AlertSource>) -> Self {
        self.alerts = Some(alerts);
        self
    }

    /// Time source.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Audit sink for lifecycle events.
    #[must_use]
    pub fn audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Resource samples kept in memory.
    #[must_use]
    pub const fn history_size(mut self, size: usize) -> Self {
        self.history_size = Some(size);
        self
    }

    /// Validate and build. The engine is not started.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` for a bad configuration, `DuplicateTask` when a task
    /// name is registered twice.
    pub fn build(self) -> Result<Orchestrator, OrchestratorError> {
        self.config.validate()?;
        let mut registry = self.registry;
        for definition in self.pending {
            registry.register(definition)?;
        }
        let probe = self
            .probe
            .unwrap_or_else(|| Arc::new(SystemProbe::new()));
        let monitor = Arc::new(ResourceMonitor::new(
            probe,
            self.history_size.unwrap_or(DEFAULT_HISTORY_SIZE),
        ));
        Orchestrator::new(EngineParts {
            config: self.config,
            registry,
            store: self.store.unwrap_or_else(|| Arc::new(InMemoryStore::new())),
            monitor,
            alerts: self.alerts.unwrap_or_else(|| Arc::new(NoAlerts)),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            audit: self.audit,
        })
    }
}
