//! Orchestrator configuration: limits, scaling bounds, schedules.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::WorkerPoolConfig;
use crate::core::cron::CronPattern;
use crate::core::error::OrchestratorError;
use crate::core::task::{ConditionPolicy, Priority};

/// Global resource thresholds, as fractions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    /// CPU ceiling for admission.
    pub cpu_threshold: f64,
    /// Memory ceiling for admission.
    pub memory_threshold: f64,
    /// Disk level reported as critical.
    pub disk_threshold: f64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpu_threshold: 0.8,
            memory_threshold: 0.85,
            disk_threshold: 0.9,
        }
    }
}

/// Floor and ceiling for auto-scaling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalingBounds {
    /// Never scale below this.
    pub min_concurrent: usize,
    /// Never scale above this.
    pub max_concurrent: usize,
}

impl Default for ScalingBounds {
    fn default() -> Self {
        Self {
            min_concurrent: 2,
            max_concurrent: 10,
        }
    }
}

/// Execution-history collection for later tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveLearningConfig {
    /// Append a learning record per finished execution.
    pub enabled: bool,
    /// Days of records considered by profile queries.
    pub learning_period_days: u32,
}

impl Default for AdaptiveLearningConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            learning_period_days: 7,
        }
    }
}

/// Override or definition of one schedule entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Five-field pattern; falls back to the built-in one.
    pub pattern: Option<String>,
    /// Whether the entry fires.
    pub enabled: Option<bool>,
    /// Priority override for submissions.
    pub priority: Option<Priority>,
    /// Condition overrides re-checked on each due tick.
    pub conditions: Option<ConditionPolicy>,
}

/// Scheduler settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Seconds between ticks.
    pub tick_interval_secs: u64,
    /// Install the built-in schedules for registered tasks.
    pub builtin_schedules: bool,
    /// Per-task overrides and additional entries.
    pub schedules: HashMap<String, ScheduleConfig>,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            tick_interval_secs: 60,
            builtin_schedules: true,
            schedules: HashMap::new(),
        }
    }
}

impl SchedulerSettings {
    /// Tick period.
    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }
}

/// Root configuration, built once and handed to every component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Initial concurrency ceiling.
    pub max_concurrent_tasks: usize,
    /// Seconds between health-monitor ticks.
    pub health_check_interval: u64,
    /// Let the health monitor move the ceiling.
    pub auto_scaling: bool,
    /// Auto-scaling bounds.
    pub scaling: ScalingBounds,
    /// Global admission thresholds.
    pub resource_limits: ResourceLimits,
    /// Default priority overrides by task name.
    pub task_priorities: HashMap<String, Priority>,
    /// Learning store settings.
    pub adaptive_learning: AdaptiveLearningConfig,
    /// How far back a completed dependency counts.
    pub dependency_lookback_hours: u64,
    /// Base of the exponential backoff, in milliseconds.
    pub backoff_base_ms: u64,
    /// How long a timed-out handler gets to honor cancellation.
    pub cancel_grace_ms: u64,
    /// Terminal executions kept for the failure penalty.
    pub recent_window: usize,
    /// Finished executions kept in memory for metrics.
    pub history_capacity: usize,
    /// Attempts for each terminal write.
    pub persist_attempts: u32,
    /// Scheduler settings.
    pub scheduler: SchedulerSettings,
    /// Worker pool sizing.
    pub workers: WorkerPoolConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 5,
            health_check_interval: 300,
            auto_scaling: true,
            scaling: ScalingBounds::default(),
            resource_limits: ResourceLimits::default(),
            task_priorities: HashMap::new(),
            adaptive_learning: AdaptiveLearningConfig::default(),
            dependency_lookback_hours: 24,
            backoff_base_ms: 1000,
            cancel_grace_ms: 5000,
            recent_window: 10,
            history_capacity: 1000,
            persist_attempts: 2,
            scheduler: SchedulerSettings::default(),
            workers: WorkerPoolConfig::default(),
        }
    }
}

fn fraction(name: &str, value: f64) -> Result<(), OrchestratorError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(OrchestratorError::InvalidConfig(format!(
            "{name} must be within [0, 1], got {value}"
        )))
    }
}

fn check_policy(owner: &str, policy: &ConditionPolicy) -> Result<(), OrchestratorError> {
    if let Some(v) = policy.max_system_load {
        fraction(&format!("{owner}.max_system_load"), v)?;
    }
    if let Some(v) = policy.max_memory_usage {
        fraction(&format!("{owner}.max_memory_usage"), v)?;
    }
    if let Some(hours) = &policy.allowed_hours {
        if let Some(h) = hours.iter().find(|h| **h > 23) {
            return Err(OrchestratorError::InvalidConfig(format!(
                "{owner}.allowed_hours contains {h}; hours are 0-23"
            )));
        }
    }
    Ok(())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>, OrchestratorError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| OrchestratorError::InvalidConfig(format!("{key}: cannot parse `{raw}`"))),
        Err(_) => Ok(None),
    }
}

impl OrchestratorConfig {
    /// Validate every field.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` or `InvalidPattern` naming the first bad field.
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        let bad = |msg: &str| Err(OrchestratorError::InvalidConfig(msg.to_owned()));
        if self.max_concurrent_tasks == 0 {
            return bad("max_concurrent_tasks must be greater than 0");
        }
        if self.health_check_interval == 0 {
            return bad("health_check_interval must be greater than 0");
        }
        if self.scaling.min_concurrent == 0 {
            return bad("scaling.min_concurrent must be greater than 0");
        }
        if self.scaling.min_concurrent > self.scaling.max_concurrent {
            return bad("scaling.min_concurrent must not exceed scaling.max_concurrent");
        }
        fraction("resource_limits.cpu_threshold", self.resource_limits.cpu_threshold)?;
        fraction("resource_limits.memory_threshold", self.resource_limits.memory_threshold)?;
        fraction("resource_limits.disk_threshold", self.resource_limits.disk_threshold)?;
        if self.adaptive_learning.learning_period_days == 0 {
            return bad("adaptive_learning.learning_period_days must be greater than 0");
        }
        if self.recent_window == 0 {
            return bad("recent_window must be greater than 0");
        }
        if self.persist_attempts == 0 {
            return bad("persist_attempts must be greater than 0");
        }
        if self.scheduler.tick_interval_secs == 0 {
            return bad("scheduler.tick_interval_secs must be greater than 0");
        }
        for (name, schedule) in &self.scheduler.schedules {
            if let Some(pattern) = &schedule.pattern {
                CronPattern::parse(pattern)?;
            }
            if let Some(policy) = &schedule.conditions {
                check_policy(&format!("scheduler.schedules.{name}"), policy)?;
            }
        }
        self.workers
            .validate()
            .map_err(|e| OrchestratorError::InvalidConfig(format!("workers: {e}")))?;
        Ok(())
    }

    /// Parse and validate JSON.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` on malformed JSON or failed validation.
    pub fn from_json_str(input: &str) -> Result<Self, OrchestratorError> {
        let cfg: Self = serde_json::from_str(input)
            .map_err(|e| OrchestratorError::InvalidConfig(format!("parse error: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read, parse and validate a JSON file.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` when the file is unreadable or invalid.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, OrchestratorError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            OrchestratorError::InvalidConfig(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&text)
    }

    /// Load `.env`, start from `ORCHESTRATOR_CONFIG` (or defaults) and apply
    /// `ORCHESTRATOR_*` overrides.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` when a variable does not parse or validation fails.
    pub fn from_env() -> Result<Self, OrchestratorError> {
        let _ = dotenvy::dotenv();
        let mut cfg = match std::env::var("ORCHESTRATOR_CONFIG") {
            Ok(path) => Self::from_json_file(path)?,
            Err(_) => Self::default(),
        };
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Apply `ORCHESTRATOR_*` variables on top of `self`.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` when a variable does not parse.
    pub fn apply_env_overrides(&mut self) -> Result<(), OrchestratorError> {
        if let Some(v) = env_parse("ORCHESTRATOR_MAX_CONCURRENT_TASKS")? {
            self.max_concurrent_tasks = v;
        }
        if let Some(v) = env_parse("ORCHESTRATOR_HEALTH_CHECK_INTERVAL")? {
            self.health_check_interval = v;
        }
        if let Some(v) = env_parse("ORCHESTRATOR_AUTO_SCALING")? {
            self.auto_scaling = v;
        }
        if let Some(v) = env_parse("ORCHESTRATOR_ADAPTIVE_LEARNING")? {
            self.adaptive_learning.enabled = v;
        }
        Ok(())
    }

    /// Health-monitor period.
    #[must_use]
    pub const fn health_check_period(&self) -> Duration {
        Duration::from_secs(self.health_check_interval)
    }

    /// Wait before the attempt following retry number `retry_count`.
    #[must_use]
    pub fn backoff_for(&self, retry_count: u32) -> Duration {
        let factor = 2u64.saturating_pow(retry_count);
        Duration::from_millis(self.backoff_base_ms.saturating_mul(factor))
    }

    /// Grace period for cancelled handlers.
    #[must_use]
    pub const fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }

    /// Dependency lookback window.
    #[must_use]
    pub fn dependency_lookback(&self) -> chrono::Duration {
        // capped at ten years
        let hours = self.dependency_lookback_hours.min(24 * 365 * 10);
        chrono::Duration::hours(i64::try_from(hours).unwrap_or(0))
    }
}
