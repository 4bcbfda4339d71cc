//! Named task definitions, including the platform's built-in tasks.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::error::OrchestratorError;
use crate::core::task::{ConditionPolicy, Priority, TaskDefinition, TaskHandler};

/// Tasks every deployment knows about. Handlers come from elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinTask {
    /// Full fuzzing scan.
    FullScan,
    /// Quick scan.
    QuickScan,
    /// Deep vulnerability scan.
    VulnerabilityScan,
    /// Subdomain enumeration.
    SubdomainDiscovery,
    /// Alert classifier retraining.
    ModelTraining,
    /// Periodic reports.
    ReportGeneration,
    /// Self check.
    HealthCheck,
    /// Housekeeping.
    Cleanup,
    /// Data backup.
    Backup,
}

impl BuiltinTask {
    /// Every built-in task.
    pub const ALL: [Self; 9] = [
        Self::FullScan,
        Self::QuickScan,
        Self::VulnerabilityScan,
        Self::SubdomainDiscovery,
        Self::ModelTraining,
        Self::ReportGeneration,
        Self::HealthCheck,
        Self::Cleanup,
        Self::Backup,
    ];

    /// Registered task name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::FullScan => "full_scan",
            Self::QuickScan => "quick_scan",
            Self::VulnerabilityScan => "vulnerability_scan",
            Self::SubdomainDiscovery => "subdomain_discovery",
            Self::ModelTraining => "model_training",
            Self::ReportGeneration => "report_generation",
            Self::HealthCheck => "health_check",
            Self::Cleanup => "cleanup",
            Self::Backup => "backup",
        }
    }

    /// Look up by registered name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }

    /// Default priority, timeout and retry ceiling.
    #[must_use]
    pub const fn policy(self) -> (Priority, Duration, u32) {
        const fn secs(s: u64) -> Duration {
            Duration::from_secs(s)
        }
        match self {
            Self::FullScan => (Priority::High, secs(7200), 2),
            Self::QuickScan => (Priority::Medium, secs(1800), 3),
            Self::VulnerabilityScan => (Priority::Critical, secs(10800), 1),
            Self::SubdomainDiscovery => (Priority::Medium, secs(3600), 2),
            Self::ModelTraining => (Priority::Low, secs(3600), 1),
            Self::ReportGeneration => (Priority::Medium, secs(600), 2),
            Self::HealthCheck => (Priority::Low, secs(300), 1),
            Self::Cleanup => (Priority::Low, secs(1800), 1),
            Self::Backup => (Priority::Medium, secs(3600), 1),
        }
    }

    /// Default admission conditions.
    #[must_use]
    pub fn conditions(self) -> ConditionPolicy {
        let load = |max: f64| ConditionPolicy {
            max_system_load: Some(max),
            ..ConditionPolicy::default()
        };
        match self {
            Self::FullScan => load(0.8),
            Self::QuickScan => load(0.9),
            Self::VulnerabilityScan => load(0.5),
            Self::SubdomainDiscovery => load(0.7),
            Self::ModelTraining => ConditionPolicy {
                max_system_load: Some(0.4),
                allowed_hours: Some(vec![2, 3, 4]),
                ..ConditionPolicy::default()
            },
            Self::Backup => load(0.3),
            Self::ReportGeneration | Self::HealthCheck | Self::Cleanup => {
                ConditionPolicy::default()
            }
        }
    }

    /// Definition with the default policy bound to `handler`.
    #[must_use]
    pub fn definition(self, handler: Arc<dyn TaskHandler>) -> TaskDefinition {
        let (priority, timeout, retries) = self.policy();
        TaskDefinition::new(self.name(), handler)
            .with_priority(priority)
            .with_timeout(timeout)
            .with_max_retries(retries)
            .with_conditions(self.conditions())
    }
}

impl fmt::Display for BuiltinTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Map of task name to definition.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    tasks: HashMap<String, Arc<TaskDefinition>>,
}

impl fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("tasks", &self.names())
            .finish()
    }
}

impl TaskRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in tasks for which a handler is supplied.
    ///
    /// # Errors
    ///
    /// `DuplicateTask` if a built-in appears twice.
    pub fn with_builtins<I>(handlers: I) -> Result<Self, OrchestratorError>
    where
        I: IntoIterator<Item = (BuiltinTask, Arc<dyn TaskHandler>)>,
    {
        let mut registry = Self::new();
        for (task, handler) in handlers {
            registry.register(task.definition(handler))?;
        }
        Ok(registry)
    }

    /// Add a definition.
    ///
    /// # Errors
    ///
    /// `DuplicateTask` if the name is taken.
    pub fn register(&mut self, definition: TaskDefinition) -> Result<(), OrchestratorError> {
        if self.tasks.contains_key(&definition.name) {
            return Err(OrchestratorError::DuplicateTask(definition.name));
        }
        info!(task = %definition.name, priority = %definition.priority, "task registered");
        self.tasks
            .insert(definition.name.clone(), Arc::new(definition));
        Ok(())
    }

    /// Add or overwrite a definition. Returns the previous one.
    pub fn register_or_replace(&mut self, definition: TaskDefinition) -> Option<Arc<TaskDefinition>> {
        let previous = self
            .tasks
            .insert(definition.name.clone(), Arc::new(definition));
        if let Some(prev) = &previous {
            info!(task = %prev.name, "task re-registered");
        }
        previous
    }

    /// Definition by name.
    ///
    /// # Errors
    ///
    /// `UnknownTask` if nothing is registered under `name`.
    pub fn lookup(&self, name: &str) -> Result<Arc<TaskDefinition>, OrchestratorError> {
        self.tasks
            .get(name)
            .cloned()
            .ok_or_else(|| OrchestratorError::UnknownTask(name.to_owned()))
    }

    /// Whether `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tasks.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of definitions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// True when empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Re-register definitions with the given default priorities.
    /// Names that are not registered are ignored.
    pub fn apply_priorities(&mut self, priorities: &HashMap<String, Priority>) {
        for (name, priority) in priorities {
            let Some(current) = self.tasks.get(name) else {
                debug!(task = %name, "priority override for unregistered task ignored");
                continue;
            };
            if current.priority == *priority {
                continue;
            }
            let updated = current.as_ref().clone().with_priority(*priority);
            self.register_or_replace(updated);
        }
    }
}
