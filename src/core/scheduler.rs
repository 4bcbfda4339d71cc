//! Fixed-tick scheduler that turns schedule entries into engine submissions.
//!
//! The scheduler never runs task bodies. Each tick it finds the entries whose
//! pattern fired since the previous tick, re-checks their lightweight
//! conditions against one fresh resource sample and hands them to the
//! [`Orchestrator`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Timelike, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{ScheduleConfig, SchedulerSettings};
use crate::core::cron::CronPattern;
use crate::core::engine::{Orchestrator, ScheduleRequest};
use crate::core::error::OrchestratorError;
use crate::core::monitor::ResourceSnapshot;
use crate::core::registry::BuiltinTask;
use crate::core::task::{ConditionPolicy, Priority, TaskArgs};
use crate::runtime::api::{DueEntry, ScheduleEntryStatus, SchedulerStatus};
use crate::util::panic::contain;

/// Horizon used by [`Scheduler::status`] for upcoming runs.
const STATUS_LOOKAHEAD_HOURS: i64 = 6;

/// One declarative schedule.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduledTaskEntry {
    /// Stable id, `sched_<task>`.
    pub id: String,
    /// Task submitted when the pattern fires.
    pub task_name: String,
    /// When to fire.
    pub pattern: CronPattern,
    /// Disabled entries keep their history but never fire.
    pub enabled: bool,
    /// Priority passed to the engine.
    pub priority: Option<Priority>,
    /// Re-checked on every due tick and passed on to the engine.
    pub conditions: Option<ConditionPolicy>,
    /// Last successful submission.
    pub last_run: Option<DateTime<Utc>>,
    /// Successful submissions.
    pub run_count: u64,
}

impl ScheduledTaskEntry {
    /// Enabled entry with no overrides.
    #[must_use]
    pub fn new(task_name: impl Into<String>, pattern: CronPattern) -> Self {
        let task_name = task_name.into();
        Self {
            id: format!("sched_{task_name}"),
            task_name,
            pattern,
            enabled: true,
            priority: None,
            conditions: None,
            last_run: None,
            run_count: 0,
        }
    }

    fn status(&self, from: NaiveDateTime) -> ScheduleEntryStatus {
        ScheduleEntryStatus {
            id: self.id.clone(),
            task_name: self.task_name.clone(),
            pattern: self.pattern.to_string(),
            supported: self.pattern.is_supported(),
            enabled: self.enabled,
            run_count: self.run_count,
            last_run: self.last_run,
            next_run: self
                .enabled
                .then(|| self.pattern.next_after(from))
                .flatten(),
        }
    }

    fn apply(&mut self, overrides: &ScheduleConfig) -> Result<(), OrchestratorError> {
        if let Some(pattern) = &overrides.pattern {
            self.pattern = CronPattern::parse(pattern)?;
        }
        if let Some(enabled) = overrides.enabled {
            self.enabled = enabled;
        }
        if overrides.priority.is_some() {
            self.priority = overrides.priority;
        }
        if let Some(conditions) = &overrides.conditions {
            self.conditions = Some(
                self.conditions
                    .as_ref()
                    .map_or_else(|| conditions.clone(), |c| c.merge(Some(conditions))),
            );
        }
        Ok(())
    }
}

/// Default pattern for a built-in task on this platform.
#[must_use]
pub const fn builtin_pattern(task: BuiltinTask) -> &'static str {
    match task {
        BuiltinTask::FullScan => {
            if cfg!(target_os = "windows") {
                "0 9,14,18,22 * * *"
            } else if cfg!(target_os = "macos") {
                "0 8,13,17,22 * * *"
            } else {
                "0 8,13,18,23 * * *"
            }
        }
        BuiltinTask::QuickScan => {
            if cfg!(target_os = "windows") {
                "*/45 * * * *"
            } else {
                "*/30 * * * *"
            }
        }
        BuiltinTask::VulnerabilityScan | BuiltinTask::ModelTraining => "0 2 * * 0",
        BuiltinTask::SubdomainDiscovery => "0 */6 * * *",
        BuiltinTask::ReportGeneration => "0 9,14 * * *",
        BuiltinTask::HealthCheck => "*/5 * * * *",
        BuiltinTask::Cleanup => "0 1 * * *",
        BuiltinTask::Backup => "0 0 * * 0",
    }
}

/// Built-in schedule entry for `task`.
///
/// # Errors
///
/// Only if a built-in pattern fails to parse.
pub fn builtin_entry(task: BuiltinTask) -> Result<ScheduledTaskEntry, OrchestratorError> {
    let mut entry = ScheduledTaskEntry::new(task.name(), CronPattern::parse(builtin_pattern(task))?);
    // vulnerability scans are scheduled at high, not their critical default
    entry.priority = Some(match task {
        BuiltinTask::VulnerabilityScan => Priority::High,
        other => other.policy().0,
    });
    let conditions = task.conditions();
    entry.conditions = (!conditions.is_empty()).then_some(conditions);
    Ok(entry)
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Execution ids submitted this tick.
    pub submitted: Vec<String>,
    /// Due tasks whose conditions did not hold.
    pub skipped: Vec<String>,
    /// Due tasks the engine refused or whose evaluation panicked.
    pub failed: Vec<String>,
}

enum Fired {
    Submitted(String),
    Skipped,
    Rejected,
}

struct SchedulerInner {
    engine: Orchestrator,
    entries: RwLock<Vec<ScheduledTaskEntry>>,
    tick_interval: Duration,
    last_checked: Mutex<NaiveDateTime>,
    scheduled: AtomicU64,
    manual: AtomicU64,
    running: AtomicBool,
    ticker: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

/// Cron-like scheduler bound to one engine. Clones share state.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("entries", &self.inner.entries.read().len())
            .field("tick_interval", &self.inner.tick_interval)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Build the schedule table: built-in entries for registered built-in
    /// tasks, then the configured overrides and additions.
    ///
    /// # Errors
    ///
    /// `InvalidPattern` for unparsable configured patterns, `UnknownTask`
    /// for configured entries naming unregistered tasks, `InvalidConfig` for
    /// a new entry without a pattern.
    pub fn new(engine: Orchestrator, settings: &SchedulerSettings) -> Result<Self, OrchestratorError> {
        let mut entries = Vec::new();
        if settings.builtin_schedules {
            for task in BuiltinTask::ALL {
                if engine.is_registered(task.name()) {
                    entries.push(builtin_entry(task)?);
                }
            }
        }

        let mut names: Vec<&String> = settings.schedules.keys().collect();
        names.sort();
        for name in names {
            let overrides = &settings.schedules[name];
            if !engine.is_registered(name) {
                return Err(OrchestratorError::UnknownTask(name.clone()));
            }
            if let Some(entry) = entries.iter_mut().find(|e| &e.task_name == name) {
                entry.apply(overrides)?;
                continue;
            }
            let pattern = overrides.pattern.as_deref().ok_or_else(|| {
                OrchestratorError::InvalidConfig(format!("schedule for `{name}` needs a pattern"))
            })?;
            let mut entry = ScheduledTaskEntry::new(name.clone(), CronPattern::parse(pattern)?);
            entry.apply(overrides)?;
            entries.push(entry);
        }

        for entry in entries.iter().filter(|e| !e.pattern.is_supported()) {
            warn!(task = %entry.task_name, pattern = %entry.pattern, "pattern stored but will never fire");
        }

        let now = engine.clock().local_now();
        Ok(Self {
            inner: Arc::new(SchedulerInner {
                engine,
                entries: RwLock::new(entries),
                tick_interval: settings.tick_interval(),
                last_checked: Mutex::new(now),
                scheduled: AtomicU64::new(0),
                manual: AtomicU64::new(0),
                running: AtomicBool::new(false),
                ticker: Mutex::new(None),
            }),
        })
    }

    /// Add an entry at runtime.
    ///
    /// # Errors
    ///
    /// `UnknownTask` if the task is not registered, `DuplicateTask` if it
    /// already has an entry.
    pub fn add_entry(&self, entry: ScheduledTaskEntry) -> Result<(), OrchestratorError> {
        if !self.inner.engine.is_registered(&entry.task_name) {
            return Err(OrchestratorError::UnknownTask(entry.task_name));
        }
        let mut entries = self.inner.entries.write();
        if entries.iter().any(|e| e.task_name == entry.task_name) {
            return Err(OrchestratorError::DuplicateTask(entry.task_name));
        }
        info!(task = %entry.task_name, pattern = %entry.pattern, "schedule entry added");
        entries.push(entry);
        Ok(())
    }

    /// Start ticking on the current runtime. No-op when already running.
    ///
    /// # Errors
    ///
    /// `Unexpected` outside a tokio runtime.
    pub fn start(&self) -> Result<(), OrchestratorError> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| OrchestratorError::Unexpected(format!("no tokio runtime: {e}")))?;
        let mut ticker = self.inner.ticker.lock();
        if ticker.is_some() {
            return Ok(());
        }
        *self.inner.last_checked.lock() = self.inner.engine.clock().local_now();
        let token = CancellationToken::new();
        let join = handle.spawn(self.clone().tick_loop(token.clone()));
        *ticker = Some((token, join));
        self.inner.running.store(true, Ordering::Release);
        info!(
            entries = self.inner.entries.read().len(),
            tick_secs = self.inner.tick_interval.as_secs(),
            "scheduler started"
        );
        Ok(())
    }

    /// Stop ticking and wait for the loop to exit.
    pub async fn stop(&self) {
        let Some((token, join)) = self.inner.ticker.lock().take() else {
            return;
        };
        token.cancel();
        if let Err(e) = join.await {
            error!(error = %e, "scheduler loop ended abnormally");
        }
        self.inner.running.store(false, Ordering::Release);
        info!("scheduler stopped");
    }

    async fn tick_loop(self, token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.inner.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;
        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = ticker.tick() => {
                    let now = self.inner.engine.clock().local_now();
                    match contain(|| self.tick_at(now)) {
                        Ok(report) => debug!(
                            submitted = report.submitted.len(),
                            skipped = report.skipped.len(),
                            failed = report.failed.len(),
                            "scheduler tick"
                        ),
                        Err(panic) => error!(panic = %panic, "scheduler tick panicked"),
                    }
                }
            }
        }
    }

    /// Evaluate every entry for fire times in `(last tick, now]` and submit
    /// the due ones.
    pub fn tick_at(&self, now: NaiveDateTime) -> TickReport {
        let since = {
            let mut last = self.inner.last_checked.lock();
            std::mem::replace(&mut *last, now)
        };
        let due: Vec<ScheduledTaskEntry> = self
            .inner
            .entries
            .read()
            .iter()
            .filter(|e| e.enabled && e.pattern.fires_between(since, now))
            .cloned()
            .collect();

        let mut report = TickReport::default();
        if due.is_empty() {
            return report;
        }

        let mut snapshot: Option<ResourceSnapshot> = None;
        for entry in due {
            match contain(|| self.fire(&entry, now, &mut snapshot)) {
                Ok(Fired::Submitted(execution_id)) => report.submitted.push(execution_id),
                Ok(Fired::Skipped) => report.skipped.push(entry.task_name),
                Ok(Fired::Rejected) => report.failed.push(entry.task_name),
                Err(panic) => {
                    error!(task = %entry.task_name, panic = %panic, "scheduled run panicked");
                    report.failed.push(entry.task_name);
                }
            }
        }
        report
    }

    fn fire(
        &self,
        entry: &ScheduledTaskEntry,
        now: NaiveDateTime,
        snapshot: &mut Option<ResourceSnapshot>,
    ) -> Fired {
        let engine = &self.inner.engine;
        if let Some(conditions) = entry.conditions.as_ref().filter(|c| !c.is_empty()) {
            let snap = *snapshot.get_or_insert_with(|| engine.monitor().sample());
            if let Err(reason) =
                conditions.evaluate(&snap, now.hour(), None, || engine.critical_alerts())
            {
                info!(task = %entry.task_name, reason = %reason, "scheduled run skipped");
                return Fired::Skipped;
            }
        }

        let mut request = ScheduleRequest::new(entry.task_name.clone());
        request.priority = entry.priority;
        request.conditions = entry.conditions.clone();
        match engine.schedule(request) {
            Ok(execution_id) => {
                self.record_run(&entry.id);
                self.inner.scheduled.fetch_add(1, Ordering::Relaxed);
                info!(task = %entry.task_name, execution_id = %execution_id, "scheduled run submitted");
                Fired::Submitted(execution_id)
            }
            Err(e) => {
                error!(task = %entry.task_name, error = %e, "scheduled run rejected");
                Fired::Rejected
            }
        }
    }

    fn record_run(&self, id: &str) {
        let now = self.inner.engine.clock().now();
        if let Some(entry) = self.inner.entries.write().iter_mut().find(|e| e.id == id) {
            entry.last_run = Some(now);
            entry.run_count += 1;
        }
    }

    fn with_entry<R>(
        &self,
        task_name: &str,
        f: impl FnOnce(&mut ScheduledTaskEntry) -> R,
    ) -> Result<R, OrchestratorError> {
        let mut entries = self.inner.entries.write();
        let entry = entries
            .iter_mut()
            .find(|e| e.task_name == task_name)
            .ok_or_else(|| OrchestratorError::UnknownTask(task_name.to_owned()))?;
        Ok(f(entry))
    }

    /// Resume firing for `task_name`.
    ///
    /// # Errors
    ///
    /// `UnknownTask` when there is no entry for it.
    pub fn enable_task(&self, task_name: &str) -> Result<(), OrchestratorError> {
        self.with_entry(task_name, |e| e.enabled = true)?;
        info!(task = task_name, "schedule enabled");
        Ok(())
    }

    /// Stop firing for `task_name`; history is kept.
    ///
    /// # Errors
    ///
    /// `UnknownTask` when there is no entry for it.
    pub fn disable_task(&self, task_name: &str) -> Result<(), OrchestratorError> {
        self.with_entry(task_name, |e| e.enabled = false)?;
        info!(task = task_name, "schedule disabled");
        Ok(())
    }

    /// Replace the pattern of `task_name`.
    ///
    /// # Errors
    ///
    /// `InvalidPattern` for malformed text, `UnknownTask` when there is no
    /// entry for it.
    pub fn update_pattern(&self, task_name: &str, pattern: &str) -> Result<(), OrchestratorError> {
        let parsed = CronPattern::parse(pattern)?;
        if !parsed.is_supported() {
            warn!(task = task_name, pattern, "pattern stored but will never fire");
        }
        let old = self.with_entry(task_name, |e| std::mem::replace(&mut e.pattern, parsed))?;
        info!(task = task_name, from = %old, to = pattern, "schedule pattern updated");
        Ok(())
    }

    /// Next fire time of each enabled entry within `window`, soonest first.
    #[must_use]
    pub fn next_runs(&self, window: chrono::Duration) -> Vec<DueEntry> {
        let from = self.inner.engine.clock().local_now();
        let until = from + window;
        let mut runs: Vec<DueEntry> = self
            .inner
            .entries
            .read()
            .iter()
            .filter(|e| e.enabled)
            .filter_map(|e| {
                let next = e.pattern.next_after(from).filter(|t| *t <= until)?;
                Some(DueEntry {
                    task_name: e.task_name.clone(),
                    next_run: next,
                    pattern: e.pattern.to_string(),
                    priority: e.priority,
                })
            })
            .collect();
        runs.sort_by(|a, b| {
            a.next_run
                .cmp(&b.next_run)
                .then_with(|| a.task_name.cmp(&b.task_name))
        });
        runs
    }

    /// Submit `task_name` outside its schedule.
    ///
    /// # Errors
    ///
    /// Whatever [`Orchestrator::schedule`] returns.
    pub fn schedule_manual(
        &self,
        task_name: &str,
        delay: Duration,
        args: TaskArgs,
    ) -> Result<String, OrchestratorError> {
        let id = self.inner.engine.schedule(
            ScheduleRequest::new(task_name)
                .with_delay(delay)
                .with_args(args),
        )?;
        self.inner.manual.fetch_add(1, Ordering::Relaxed);
        info!(task = task_name, execution_id = %id, "manual run submitted");
        Ok(id)
    }

    /// Per-entry statistics.
    #[must_use]
    pub fn entries(&self) -> Vec<ScheduleEntryStatus> {
        let from = self.inner.engine.clock().local_now();
        self.inner
            .entries
            .read()
            .iter()
            .map(|e| e.status(from))
            .collect()
    }

    /// Scheduler totals and the runs due over the next six hours.
    #[must_use]
    pub fn status(&self) -> SchedulerStatus {
        let (total, enabled) = {
            let entries = self.inner.entries.read();
            (entries.len(), entries.iter().filter(|e| e.enabled).count())
        };
        SchedulerStatus {
            is_running: self.inner.running.load(Ordering::Acquire),
            total_entries: total,
            enabled_entries: enabled,
            scheduled_submissions: self.inner.scheduled.load(Ordering::Relaxed),
            manual_submissions: self.inner.manual.load(Ordering::Relaxed),
            next_runs: self.next_runs(chrono::Duration::hours(STATUS_LOOKAHEAD_HOURS)),
        }
    }
}
