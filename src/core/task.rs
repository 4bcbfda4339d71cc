//! Task definitions, priorities, admission conditions and the handler seam.

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::config::ResourceLimits;
use crate::core::error::OrchestratorError;
use crate::core::monitor::ResourceSnapshot;

/// Opaque keyword arguments handed to a handler.
pub type TaskArgs = serde_json::Map<String, Value>;

/// Execution priority. Ordering puts `Critical` highest.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Background work.
    Low,
    /// Default level.
    #[default]
    Medium,
    /// Preferred over medium and low.
    High,
    /// Always dispatched first.
    Critical,
}

impl Priority {
    /// Lowercase name as used in configuration.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" | "normal" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(OrchestratorError::InvalidConfig(format!(
                "unknown priority `{other}`"
            ))),
        }
    }
}

/// Admission gate evaluated against a fresh resource snapshot.
///
/// Every field is optional; an empty policy admits unconditionally and also
/// skips the global resource limits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConditionPolicy {
    /// Maximum CPU load as a fraction (0.8 = 80%).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_system_load: Option<f64>,
    /// Maximum memory usage as a fraction.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_memory_usage: Option<f64>,
    /// Local hours of the day (0-23) in which the task may run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_hours: Option<Vec<u32>>,
    /// Maximum number of outstanding critical alerts tolerated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_critical_alerts: Option<u32>,
}

impl ConditionPolicy {
    /// True when no field is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.max_system_load.is_none()
            && self.max_memory_usage.is_none()
            && self.allowed_hours.is_none()
            && self.max_critical_alerts.is_none()
    }

    /// Overlay `overrides` on top of `self`, field by field.
    #[must_use]
    pub fn merge(&self, overrides: Option<&Self>) -> Self {
        let Some(o) = overrides else {
            return self.clone();
        };
        Self {
            max_system_load: o.max_system_load.or(self.max_system_load),
            max_memory_usage: o.max_memory_usage.or(self.max_memory_usage),
            allowed_hours: o.allowed_hours.clone().or_else(|| self.allowed_hours.clone()),
            max_critical_alerts: o.max_critical_alerts.or(self.max_critical_alerts),
        }
    }

    /// Check the policy. Returns the first violated rule as a human-readable reason.
    ///
    /// `critical_alerts` is only consulted when `max_critical_alerts` is set.
    /// `limits`, when given, adds the global CPU/memory thresholds.
    pub fn evaluate<F>(
        &self,
        snapshot: &ResourceSnapshot,
        local_hour: u32,
        limits: Option<&ResourceLimits>,
        critical_alerts: F,
    ) -> Result<(), String>
    where
        F: FnOnce() -> u32,
    {
        let cpu = snapshot.cpu_fraction();
        if let Some(max) = self.max_system_load {
            if cpu > max {
                return Err(format!(
                    "system load {:.0}% above limit {:.0}%",
                    cpu * 100.0,
                    max * 100.0
                ));
            }
        }
        if let Some(max) = self.max_memory_usage {
            if snapshot.memory_fraction > max {
                return Err(format!(
                    "memory usage {:.0}% above limit {:.0}%",
                    snapshot.memory_fraction * 100.0,
                    max * 100.0
                ));
            }
        }
        if let Some(hours) = &self.allowed_hours {
            if !hours.contains(&local_hour) {
                return Err(format!("hour {local_hour} outside allowed hours {hours:?}"));
            }
        }
        if let Some(max) = self.max_critical_alerts {
            let count = critical_alerts();
            if count > max {
                return Err(format!("{count} critical alerts outstanding (limit {max})"));
            }
        }
        if let Some(limits) = limits {
            if cpu > limits.cpu_threshold {
                return Err(format!(
                    "system load {:.0}% above global threshold {:.0}%",
                    cpu * 100.0,
                    limits.cpu_threshold * 100.0
                ));
            }
            if snapshot.memory_fraction > limits.memory_threshold {
                return Err(format!(
                    "memory usage {:.0}% above global threshold {:.0}%",
                    snapshot.memory_fraction * 100.0,
                    limits.memory_threshold * 100.0
                ));
            }
        }
        Ok(())
    }
}

/// Everything a handler gets for one attempt.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    /// Execution this attempt belongs to.
    pub execution_id: String,
    /// Registered task name.
    pub task_name: String,
    /// Zero on the first attempt, then the current retry count.
    pub attempt: u32,
    /// Caller-supplied arguments.
    pub args: TaskArgs,
    /// Fired on timeout or shutdown; handlers check it at safe points.
    pub cancel: CancellationToken,
    // shared by clones so the engine sees what the handler reported
    worker: Arc<Mutex<Option<String>>>,
}

impl HandlerContext {
    /// Context for one attempt of `execution_id`.
    #[must_use]
    pub fn new(
        execution_id: impl Into<String>,
        task_name: impl Into<String>,
        attempt: u32,
        args: TaskArgs,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            task_name: task_name.into(),
            attempt,
            args,
            cancel,
            worker: Arc::default(),
        }
    }

    /// Context for direct invocation outside the engine.
    #[must_use]
    pub fn detached(task_name: impl Into<String>, args: TaskArgs) -> Self {
        Self::new(
            uuid::Uuid::new_v4().to_string(),
            task_name,
            0,
            args,
            CancellationToken::new(),
        )
    }

    /// True once cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Record the worker that ran this attempt. Visible through every clone.
    pub fn assign_worker(&self, worker_id: impl Into<String>) {
        *self.worker.lock() = Some(worker_id.into());
    }

    /// Worker recorded by [`Self::assign_worker`].
    #[must_use]
    pub fn assigned_worker(&self) -> Option<String> {
        self.worker.lock().clone()
    }
}

/// Opaque unit of work bound to a task name.
#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    /// Run one attempt.
    async fn run(&self, ctx: HandlerContext) -> anyhow::Result<Value>;
}

/// Adapts an async closure into a [`TaskHandler`].
pub struct FnHandler<F> {
    f: F,
}

impl<F> FnHandler<F> {
    /// Wrap a closure.
    pub const fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(HandlerContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    async fn run(&self, ctx: HandlerContext) -> anyhow::Result<Value> {
        (self.f)(ctx).await
    }
}

/// Shorthand for `Arc::new(FnHandler::new(f))`.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn TaskHandler>
where
    F: Fn(HandlerContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(FnHandler::new(f))
}

/// Default per-attempt timeout.
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(3600);
/// Default retry ceiling.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// A named task and its default execution policy.
#[derive(Clone)]
pub struct TaskDefinition {
    /// Unique key.
    pub name: String,
    /// The work itself.
    pub handler: Arc<dyn TaskHandler>,
    /// Default priority; a submission may override it.
    pub priority: Priority,
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// Attempts after the first one.
    pub max_retries: u32,
    /// Tasks that must have completed recently.
    pub dependencies: Vec<String>,
    /// Default admission policy.
    pub conditions: ConditionPolicy,
    /// Whether a timeout counts as a retryable failure.
    pub retry_on_timeout: bool,
}

impl fmt::Debug for TaskDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDefinition")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .field("dependencies", &self.dependencies)
            .field("conditions", &self.conditions)
            .field("retry_on_timeout", &self.retry_on_timeout)
            .finish_non_exhaustive()
    }
}

impl TaskDefinition {
    /// New definition with medium priority, a one hour timeout and three retries.
    pub fn new(name: impl Into<String>, handler: Arc<dyn TaskHandler>) -> Self {
        Self {
            name: name.into(),
            handler,
            priority: Priority::Medium,
            timeout: DEFAULT_TASK_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            dependencies: Vec::new(),
            conditions: ConditionPolicy::default(),
            retry_on_timeout: false,
        }
    }

    /// Set the default priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the per-attempt timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the retry ceiling.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set prerequisite task names.
    #[must_use]
    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Set the default condition policy.
    #[must_use]
    pub fn with_conditions(mut self, conditions: ConditionPolicy) -> Self {
        self.conditions = conditions;
        self
    }

    /// Opt into retrying timeouts.
    #[must_use]
    pub const fn retry_on_timeout(mut self, retry: bool) -> Self {
        self.retry_on_timeout = retry;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(cpu_percent: f64, memory: f64) -> ResourceSnapshot {
        ResourceSnapshot::new(cpu_percent, memory, 0.1)
    }

    #[test]
    fn priority_orders_critical_first() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::High > Priority::Medium);
        assert!(Priority::Medium > Priority::Low);
        assert_eq!("HIGH".parse::<Priority>().unwrap(), Priority::High);
        assert!("urgent".parse::<Priority>().is_err());
    }

    #[test]
    fn priority_serde_is_lowercase() {
        let json = serde_json::to_string(&Priority::Critical).unwrap();
        assert_eq!(json, "\"critical\"");
    }

    #[test]
    fn empty_policy_admits_everything() {
        let policy = ConditionPolicy::default();
        assert!(policy.is_empty());
        assert!(policy.evaluate(&snapshot(99.0, 0.99), 3, None, || 50).is_ok());
    }

    #[test]
    fn load_ceiling_rejects_busy_system() {
        let policy = ConditionPolicy {
            max_system_load: Some(0.5),
            ..ConditionPolicy::default()
        };
        let reason = policy
            .evaluate(&snapshot(90.0, 0.2), 10, None, || 0)
            .unwrap_err();
        assert!(reason.contains("system load"));
    }

    #[test]
    fn allowed_hours_and_alerts() {
        let policy = ConditionPolicy {
            allowed_hours: Some(vec![2, 3, 4]),
            max_critical_alerts: Some(0),
            ..ConditionPolicy::default()
        };
        assert!(policy.evaluate(&snapshot(10.0, 0.1), 5, None, || 0).is_err());
        assert!(policy.evaluate(&snapshot(10.0, 0.1), 3, None, || 1).is_err());
        assert!(policy.evaluate(&snapshot(10.0, 0.1), 3, None, || 0).is_ok());
    }

    #[test]
    fn alert_source_untouched_without_ceiling() {
        let policy = ConditionPolicy {
            max_system_load: Some(0.9),
            ..ConditionPolicy::default()
        };
        let result = policy.evaluate(&snapshot(10.0, 0.1), 0, None, || {
            panic!("alert source should not be queried")
        });
        assert!(result.is_ok());
    }

    #[test]
    fn global_limits_apply() {
        let policy = ConditionPolicy {
            max_system_load: Some(0.95),
            ..ConditionPolicy::default()
        };
        let limits = ResourceLimits::default();
        assert!(policy
            .evaluate(&snapshot(85.0, 0.1), 0, Some(&limits), || 0)
            .is_err());
        assert!(policy.evaluate(&snapshot(85.0, 0.1), 0, None, || 0).is_ok());
    }

    #[test]
    fn merge_prefers_overrides() {
        let base = ConditionPolicy {
            max_system_load: Some(0.8),
            allowed_hours: Some(vec![1]),
            ..ConditionPolicy::default()
        };
        let over = ConditionPolicy {
            max_system_load: Some(0.5),
            ..ConditionPolicy::default()
        };
        let merged = base.merge(Some(&over));
        assert_eq!(merged.max_system_load, Some(0.5));
        assert_eq!(merged.allowed_hours, Some(vec![1]));
        assert_eq!(base.merge(None), base);
    }

    #[test]
    fn policy_deserializes_from_config_keys() {
        let policy: ConditionPolicy =
            serde_json::from_str(r#"{"max_system_load": 0.4, "allowed_hours": [2, 3]}"#).unwrap();
        assert_eq!(policy.max_system_load, Some(0.4));
        assert_eq!(policy.allowed_hours, Some(vec![2, 3]));
        assert!(policy.max_critical_alerts.is_none());
    }

    #[tokio::test]
    async fn fn_handler_runs_closure() {
        let handler = handler_fn(|ctx: HandlerContext| async move {
            Ok(Value::String(ctx.task_name))
        });
        let out = handler
            .run(HandlerContext::detached("demo", TaskArgs::new()))
            .await
            .unwrap();
        assert_eq!(out, Value::String("demo".into()));
    }
}
