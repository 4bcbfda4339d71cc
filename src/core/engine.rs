//! Execution engine: bounded dispatch, gated admission, iterative retries,
//! single terminal write, and the health-driven auto-scale loop.
//!
//! One coordinating loop owns the queue. It admits an execution only after
//! taking a slot from [`Capacity`], then runs the lifecycle on its own task so
//! the loop never waits on a handler. A slot is held from admission until the
//! terminal record is written, retries and backoff included.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::OrchestratorConfig;
use crate::core::audit::{build_audit_event, AuditAction, AuditSink};
use crate::core::capacity::Capacity;
use crate::core::error::OrchestratorError;
use crate::core::execution::{
    ExecutionStatus, ExecutionSummary, ResourceUsage, TaskExecution,
};
use crate::core::health::{self, HealthReport, ScaleDecision};
use crate::core::learning::{hourly_profile, AdaptiveLearningRecord, HourlyProfile};
use crate::core::monitor::{AlertSource, ResourceMonitor, ResourceSnapshot, SystemMetricsRecord};
use crate::core::queue::ExecutionQueue;
use crate::core::registry::TaskRegistry;
use crate::core::task::{ConditionPolicy, HandlerContext, Priority, TaskArgs, TaskDefinition};
use crate::infra::store::{ExecutionStore, PruneReport};
use crate::runtime::api::{EngineStatus, MetricsSnapshot};
use crate::util::clock::Clock;
use crate::util::panic::contain;

/// Fallback wake-up for the dispatch loop when no notification arrives.
const DISPATCH_IDLE_POLL: Duration = Duration::from_secs(1);
/// Pause between attempts to write a terminal record.
const PERSIST_RETRY_DELAY: Duration = Duration::from_millis(100);
/// System metrics retention.
const METRICS_RETENTION_DAYS: i64 = 30;
/// Execution record retention.
const EXECUTION_RETENTION_DAYS: i64 = 60;

/// A request to run a registered task.
#[derive(Debug, Clone, Default)]
pub struct ScheduleRequest {
    /// Registered task name.
    pub task_name: String,
    /// Wait before enqueueing.
    pub delay: Duration,
    /// Overrides the definition's priority.
    pub priority: Option<Priority>,
    /// Overlaid on the definition's conditions.
    pub conditions: Option<ConditionPolicy>,
    /// Passed to the handler.
    pub args: TaskArgs,
}

impl ScheduleRequest {
    /// Request for `task_name` with defaults.
    pub fn new(task_name: impl Into<String>) -> Self {
        Self {
            task_name: task_name.into(),
            ..Self::default()
        }
    }

    /// Delay the enqueue.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Override the priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Override conditions.
    #[must_use]
    pub fn with_conditions(mut self, conditions: ConditionPolicy) -> Self {
        self.conditions = Some(conditions);
        self
    }

    /// Handler arguments.
    #[must_use]
    pub fn with_args(mut self, args: TaskArgs) -> Self {
        self.args = args;
        self
    }
}

/// Collaborators an engine is assembled from.
pub struct EngineParts {
    /// Validated configuration.
    pub config: OrchestratorConfig,
    /// Task definitions.
    pub registry: TaskRegistry,
    /// Persistence.
    pub store: Arc<dyn ExecutionStore>,
    /// Resource sampling.
    pub monitor: Arc<ResourceMonitor>,
    /// Critical alert counts.
    pub alerts: Arc<dyn AlertSource>,
    /// Time source.
    pub clock: Arc<dyn Clock>,
    /// Optional lifecycle audit trail.
    pub audit: Option<Arc<dyn AuditSink>>,
}

struct Pending {
    definition: Arc<TaskDefinition>,
    execution: Arc<Mutex<TaskExecution>>,
    conditions: ConditionPolicy,
    args: TaskArgs,
}

#[derive(Debug, Clone, Copy)]
struct Finished {
    status: ExecutionStatus,
    completed_at: DateTime<Utc>,
    duration_seconds: Option<f64>,
}

struct Verdict {
    status: ExecutionStatus,
    error: Option<OrchestratorError>,
    context: Option<(chrono::NaiveDateTime, ResourceSnapshot)>,
}

impl Verdict {
    fn cancelled(err: OrchestratorError) -> Self {
        Self {
            status: ExecutionStatus::Cancelled,
            error: Some(err),
            context: None,
        }
    }

    fn failed(err: OrchestratorError) -> Self {
        Self {
            status: ExecutionStatus::Failed,
            error: Some(err),
            context: None,
        }
    }

    fn completed() -> Self {
        Self {
            status: ExecutionStatus::Completed,
            error: None,
            context: None,
        }
    }
}

enum Attempt {
    Failed(String),
    TimedOut { detached: bool },
    Panicked(String),
}

struct Inner {
    config: OrchestratorConfig,
    registry: RwLock<TaskRegistry>,
    store: Arc<dyn ExecutionStore>,
    monitor: Arc<ResourceMonitor>,
    alerts: Arc<dyn AlertSource>,
    clock: Arc<dyn Clock>,
    audit: Option<Arc<dyn AuditSink>>,
    queue: Mutex<ExecutionQueue<Pending>>,
    capacity: Capacity,
    live: RwLock<HashMap<String, Arc<Mutex<TaskExecution>>>>,
    recent: Mutex<VecDeque<ExecutionStatus>>,
    finished: Mutex<VecDeque<Finished>>,
    wake: Notify,
    settled: Notify,
    shutdown: CancellationToken,
    running: AtomicBool,
    orphaned: AtomicU64,
    last_health: RwLock<Option<HealthReport>>,
    loops: Mutex<Vec<JoinHandle<()>>>,
}

/// The execution engine. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("capacity", &self.inner.capacity.snapshot())
            .field("queued", &self.queue_len())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Assemble an engine. Prefer [`crate::builders::OrchestratorBuilder`].
    ///
    /// # Errors
    ///
    /// `InvalidConfig` when the configuration fails validation.
    pub fn new(parts: EngineParts) -> Result<Self, OrchestratorError> {
        let EngineParts {
            config,
            mut registry,
            store,
            monitor,
            alerts,
            clock,
            audit,
        } = parts;
        config.validate()?;
        registry.apply_priorities(&config.task_priorities);
        let ceiling = config.max_concurrent_tasks;
        let recent_window = config.recent_window;
        Ok(Self {
            inner: Arc::new(Inner {
                registry: RwLock::new(registry),
                store,
                monitor,
                alerts,
                clock,
                audit,
                queue: Mutex::new(ExecutionQueue::new()),
                capacity: Capacity::new(ceiling),
                live: RwLock::new(HashMap::new()),
                recent: Mutex::new(VecDeque::with_capacity(recent_window)),
                finished: Mutex::new(VecDeque::new()),
                wake: Notify::new(),
                settled: Notify::new(),
                shutdown: CancellationToken::new(),
                running: AtomicBool::new(false),
                orphaned: AtomicU64::new(0),
                last_health: RwLock::new(None),
                loops: Mutex::new(Vec::new()),
                config,
            }),
        })
    }

    /// Start the dispatch and health-monitor loops on the current runtime.
    /// Calling it again while running is a no-op.
    ///
    /// # Errors
    ///
    /// `ShuttingDown` after [`Self::shutdown`]; `Unexpected` outside a tokio runtime.
    pub fn start(&self) -> Result<(), OrchestratorError> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| OrchestratorError::Unexpected(format!("no tokio runtime: {e}")))?;
        if self.inner.shutdown.is_cancelled() {
            return Err(OrchestratorError::ShuttingDown);
        }
        if self.inner.running.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let dispatch = handle.spawn(self.clone().dispatch_loop());
        let health = handle.spawn(self.clone().health_loop());
        self.inner.loops.lock().extend([dispatch, health]);
        info!(
            max_concurrent_tasks = self.inner.capacity.ceiling(),
            auto_scaling = self.inner.config.auto_scaling,
            tasks = self.inner.registry.read().len(),
            "orchestrator started"
        );
        Ok(())
    }

    /// Stop accepting work, cancel queued executions and wait up to `grace`
    /// for in-flight ones.
    pub async fn shutdown(&self, grace: Duration) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        info!("orchestrator shutting down");
        self.inner.shutdown.cancel();
        self.inner.wake.notify_one();

        let leftover = self.inner.queue.lock().drain();
        for pending in leftover {
            self.cancel_unstarted(&pending, &OrchestratorError::ShuttingDown)
                .await;
        }

        let drained = self.wait_until(grace, |o| o.inner.capacity.running() == 0).await;
        if !drained {
            warn!(
                running = self.inner.capacity.running(),
                "executions still in flight after shutdown grace"
            );
        }

        let loops: Vec<JoinHandle<()>> = self.inner.loops.lock().drain(..).collect();
        for handle in loops {
            handle.abort();
        }
        self.inner.running.store(false, Ordering::Release);
        info!("orchestrator stopped");
    }

    /// Register a definition at runtime.
    ///
    /// # Errors
    ///
    /// `DuplicateTask` if the name is taken.
    pub fn register(&self, definition: TaskDefinition) -> Result<(), OrchestratorError> {
        self.inner.registry.write().register(definition)
    }

    /// Register or overwrite a definition at runtime.
    pub fn register_or_replace(&self, definition: TaskDefinition) {
        self.inner.registry.write().register_or_replace(definition);
    }

    /// Whether `name` is registered.
    #[must_use]
    pub fn is_registered(&self, name: &str) -> bool {
        self.inner.registry.read().contains(name)
    }

    /// Submit an execution. Returns its id immediately.
    ///
    /// # Errors
    ///
    /// `UnknownTask` for unregistered names, `ShuttingDown` after shutdown,
    /// `Unexpected` when a delayed submission is made outside a tokio runtime.
    pub fn schedule(&self, request: ScheduleRequest) -> Result<String, OrchestratorError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(OrchestratorError::ShuttingDown);
        }
        let definition = self.inner.registry.read().lookup(&request.task_name)?;
        let ScheduleRequest {
            delay,
            priority,
            conditions,
            args,
            ..
        } = request;
        let priority = priority.unwrap_or(definition.priority);
        let conditions = definition.conditions.merge(conditions.as_ref());

        let execution = TaskExecution::new(
            definition.name.clone(),
            priority,
            self.inner.clock.now(),
            args.clone(),
        );
        let id = execution.id.clone();
        let execution = Arc::new(Mutex::new(execution));
        let pending = Pending {
            definition: Arc::clone(&definition),
            execution: Arc::clone(&execution),
            conditions,
            args,
        };

        if delay.is_zero() {
            self.inner.live.write().insert(id.clone(), execution);
            self.enqueue(pending);
        } else {
            let handle = tokio::runtime::Handle::try_current()
                .map_err(|e| OrchestratorError::Unexpected(format!("no tokio runtime: {e}")))?;
            self.inner.live.write().insert(id.clone(), execution);
            let this = self.clone();
            handle.spawn(async move {
                tokio::select! {
                    () = tokio::time::sleep(delay) => this.enqueue(pending),
                    () = this.inner.shutdown.cancelled() => {
                        this.cancel_unstarted(&pending, &OrchestratorError::ShuttingDown).await;
                    }
                }
            });
        }

        self.audit(&id, &definition.name, AuditAction::Submit, None);
        info!(
            execution_id = %id,
            task = %definition.name,
            priority = %priority,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "execution scheduled"
        );
        Ok(id)
    }

    fn enqueue(&self, pending: Pending) {
        let priority = pending.execution.lock().priority;
        self.inner.queue.lock().push(priority, pending);
        self.inner.wake.notify_one();
    }

    async fn dispatch_loop(self) {
        debug!("dispatch loop started");
        loop {
            self.drain_queue();
            tokio::select! {
                () = self.inner.shutdown.cancelled() => break,
                () = self.inner.wake.notified() => {}
                () = tokio::time::sleep(DISPATCH_IDLE_POLL) => {}
            }
        }
        debug!("dispatch loop stopped");
    }

    fn drain_queue(&self) {
        loop {
            if self.inner.shutdown.is_cancelled() || self.inner.queue.lock().is_empty() {
                return;
            }
            if !self.inner.capacity.try_acquire() {
                debug!(queued = self.queue_len(), "at capacity; waiting for a slot");
                return;
            }
            let Some(pending) = self.inner.queue.lock().pop() else {
                self.inner.capacity.release();
                return;
            };
            let this = self.clone();
            tokio::spawn(async move { this.supervise(pending).await });
        }
    }

    /// Outermost boundary of one execution: anything escaping the lifecycle
    /// is recorded as `Failed`, and the slot is always returned.
    async fn supervise(self, pending: Pending) {
        let Pending {
            definition,
            execution,
            conditions,
            args,
        } = pending;
        let id = execution.lock().id.clone();

        let this = self.clone();
        let ex = Arc::clone(&execution);
        let def = Arc::clone(&definition);
        let outcome =
            tokio::spawn(async move { this.run_lifecycle(&def, &ex, &conditions, &args).await })
                .await;

        let verdict = match outcome {
            Ok(Ok(verdict)) => verdict,
            Ok(Err(err)) => Verdict::failed(err),
            Err(join) => Verdict::failed(OrchestratorError::Unexpected(format!(
                "execution lifecycle panicked: {join}"
            ))),
        };
        if let Some(OrchestratorError::Unexpected(msg)) = &verdict.error {
            error!(execution_id = %id, task = %definition.name, error = %msg, "execution aborted");
        }
        self.conclude(&execution, verdict).await;

        self.inner.live.write().remove(&id);
        self.inner.capacity.release();
        self.inner.wake.notify_one();
        self.inner.settled.notify_waiters();
    }

    async fn run_lifecycle(
        &self,
        definition: &TaskDefinition,
        execution: &Mutex<TaskExecution>,
        conditions: &ConditionPolicy,
        args: &TaskArgs,
    ) -> Result<Verdict, OrchestratorError> {
        let inner = &self.inner;
        let local_start = inner.clock.local_now();
        let id = {
            let mut ex = execution.lock();
            ex.started_at = Some(inner.clock.now());
            ex.id.clone()
        };
        let name = definition.name.as_str();

        let snapshot = inner.monitor.sample();
        let limits = (!conditions.is_empty()).then_some(&inner.config.resource_limits);
        if let Err(reason) =
            conditions.evaluate(&snapshot, local_start.hour(), limits, || self.critical_alerts())
        {
            warn!(execution_id = %id, task = name, reason = %reason, "conditions not met; cancelling");
            return Ok(Verdict::cancelled(OrchestratorError::ConditionNotMet(reason)));
        }

        for dep in &definition.dependencies {
            if !self.dependency_satisfied(dep) {
                warn!(execution_id = %id, task = name, dependency = %dep, "dependency not satisfied; cancelling");
                return Ok(Verdict::cancelled(OrchestratorError::DependencyNotSatisfied(
                    dep.clone(),
                )));
            }
        }

        let pre = inner.monitor.sample();
        let started = Instant::now();
        let mut verdict = loop {
            let attempt = {
                let mut ex = execution.lock();
                ex.transition(ExecutionStatus::Running)?;
                ex.retry_count
            };
            self.audit(&id, name, AuditAction::Start, Some(format!("attempt {attempt}")));
            info!(execution_id = %id, task = name, attempt, "execution running");

            let failure = match self.invoke(definition, execution, attempt, args).await {
                Ok(value) => {
                    execution.lock().result = Some(value);
                    break Verdict::completed();
                }
                Err(Attempt::Failed(msg)) => OrchestratorError::Handler(msg),
                Err(Attempt::Panicked(msg)) => break Verdict::failed(OrchestratorError::Unexpected(msg)),
                Err(Attempt::TimedOut { detached }) => {
                    if detached {
                        execution.lock().detached = true;
                        inner.orphaned.fetch_add(1, Ordering::Relaxed);
                        self.audit(&id, name, AuditAction::Detach, None);
                        warn!(execution_id = %id, task = name, "handler ignored cancellation; left running detached");
                    }
                    let err = OrchestratorError::Timeout(definition.timeout);
                    // a detached body is still running; never start a second one beside it
                    if detached || !definition.retry_on_timeout {
                        break Verdict::failed(err);
                    }
                    err
                }
            };

            let retry_count = execution.lock().retry_count;
            if retry_count >= definition.max_retries || inner.shutdown.is_cancelled() {
                break Verdict::failed(failure);
            }
            let next = retry_count + 1;
            {
                let mut ex = execution.lock();
                ex.retry_count = next;
                ex.set_error(&failure);
                ex.transition(ExecutionStatus::Retrying)?;
            }
            let wait = inner.config.backoff_for(next);
            warn!(
                execution_id = %id,
                task = name,
                retry = next,
                max_retries = definition.max_retries,
                backoff_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                error = %failure,
                "attempt failed; retrying after backoff"
            );
            self.audit(&id, name, AuditAction::Retry, Some(failure.to_string()));
            tokio::select! {
                () = tokio::time::sleep(wait) => {}
                () = inner.shutdown.cancelled() => break Verdict::failed(OrchestratorError::ShuttingDown),
            }
        };

        let post = inner.monitor.sample();
        execution.lock().resource_usage = Some(ResourceUsage::between(
            &pre,
            &post,
            started.elapsed().as_secs_f64(),
        ));
        verdict.context = Some((local_start, post));
        Ok(verdict)
    }

    async fn invoke(
        &self,
        definition: &TaskDefinition,
        execution: &Mutex<TaskExecution>,
        attempt: u32,
        args: &TaskArgs,
    ) -> Result<Value, Attempt> {
        let cancel = self.inner.shutdown.child_token();
        let execution_id = execution.lock().id.clone();
        let ctx = HandlerContext::new(
            execution_id,
            definition.name.clone(),
            attempt,
            args.clone(),
            cancel.clone(),
        );
        let reported = ctx.clone();
        let handler = Arc::clone(&definition.handler);
        let mut handle = tokio::spawn(async move { handler.run(ctx).await });

        let outcome = match tokio::time::timeout(definition.timeout, &mut handle).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(e))) => Err(Attempt::Failed(format!("{e:#}"))),
            Ok(Err(join)) => Err(Attempt::Panicked(format!("handler panicked: {join}"))),
            Err(_) => {
                cancel.cancel();
                let detached = tokio::time::timeout(self.inner.config.cancel_grace(), &mut handle)
                    .await
                    .is_err();
                Err(Attempt::TimedOut { detached })
            }
        };
        if let Some(worker_id) = reported.assigned_worker() {
            execution.lock().worker_id = Some(worker_id);
        }
        outcome
    }

    /// Apply the terminal status and write the record exactly once.
    async fn conclude(&self, execution: &Mutex<TaskExecution>, verdict: Verdict) {
        let now = self.inner.clock.now();
        let record = {
            let mut ex = execution.lock();
            match &verdict.error {
                Some(err) => ex.set_error(err),
                None => {
                    ex.error = None;
                    ex.error_kind = None;
                }
            }
            if let Err(e) = ex.transition(verdict.status) {
                error!(execution_id = %ex.id, error = %e, "forcing terminal status");
                ex.status = verdict.status;
            }
            ex.finish_at(now);
            ex.clone()
        };

        self.persist(&record).await;
        self.record_outcome(&record);

        let action = match record.status {
            ExecutionStatus::Completed => AuditAction::Complete,
            ExecutionStatus::Cancelled => AuditAction::Cancel,
            _ => AuditAction::Fail,
        };
        self.audit(&record.id, &record.task_name, action, record.error.clone());
        match record.status {
            ExecutionStatus::Completed => info!(
                execution_id = %record.id,
                task = %record.task_name,
                retries = record.retry_count,
                duration_s = record.duration_seconds.unwrap_or_default(),
                "execution completed"
            ),
            ExecutionStatus::Cancelled => info!(
                execution_id = %record.id,
                task = %record.task_name,
                error = record.error.as_deref().unwrap_or_default(),
                "execution cancelled"
            ),
            _ => error!(
                execution_id = %record.id,
                task = %record.task_name,
                retries = record.retry_count,
                error = record.error.as_deref().unwrap_or_default(),
                "execution failed"
            ),
        }

        if let Some((local_start, snapshot)) = verdict.context {
            if self.inner.config.adaptive_learning.enabled {
                let row = AdaptiveLearningRecord::from_execution(&record, local_start, &snapshot, now);
                if let Err(e) = self.inner.store.append_learning(&row) {
                    error!(execution_id = %record.id, error = %e, "failed to append learning record");
                }
            }
        }
    }

    async fn persist(&self, record: &TaskExecution) {
        let attempts = self.inner.config.persist_attempts.max(1);
        for attempt in 1..=attempts {
            match self.inner.store.save_execution(record) {
                Ok(()) => return,
                Err(e) => {
                    error!(execution_id = %record.id, attempt, error = %e, "failed to persist execution");
                    if attempt < attempts {
                        tokio::time::sleep(PERSIST_RETRY_DELAY).await;
                    }
                }
            }
        }
        error!(
            execution_id = %record.id,
            status = %record.status,
            attempts,
            "dropping execution record after repeated write failures"
        );
    }

    fn record_outcome(&self, record: &TaskExecution) {
        if matches!(
            record.status,
            ExecutionStatus::Completed | ExecutionStatus::Failed
        ) {
            let mut recent = self.inner.recent.lock();
            if recent.len() >= self.inner.config.recent_window {
                recent.pop_front();
            }
            recent.push_back(record.status);
        }
        let mut finished = self.inner.finished.lock();
        if finished.len() >= self.inner.config.history_capacity.max(1) {
            finished.pop_front();
        }
        finished.push_back(Finished {
            status: record.status,
            completed_at: record.completed_at.unwrap_or_else(|| self.inner.clock.now()),
            duration_seconds: record.duration_seconds,
        });
    }

    async fn cancel_unstarted(&self, pending: &Pending, err: &OrchestratorError) {
        let record = {
            let mut ex = pending.execution.lock();
            if ex.status.is_terminal() {
                return;
            }
            ex.set_error(err);
            if ex.transition(ExecutionStatus::Cancelled).is_err() {
                return;
            }
            ex.finish_at(self.inner.clock.now());
            ex.clone()
        };
        self.persist(&record).await;
        self.record_outcome(&record);
        self.audit(&record.id, &record.task_name, AuditAction::Cancel, record.error.clone());
        self.inner.live.write().remove(&record.id);
        self.inner.settled.notify_waiters();
    }

    fn dependency_satisfied(&self, dependency: &str) -> bool {
        let since = self.inner.clock.now() - self.inner.config.dependency_lookback();
        match self.inner.store.last_completed(dependency, since) {
            Ok(found) => found.is_some(),
            Err(e) => {
                error!(dependency, error = %e, "dependency lookup failed; treating as unsatisfied");
                false
            }
        }
    }

    pub(crate) fn critical_alerts(&self) -> u32 {
        self.inner.alerts.critical_alerts().unwrap_or_else(|e| {
            error!(error = %e, "critical alert count unavailable; assuming none");
            0
        })
    }

    pub(crate) fn monitor(&self) -> &ResourceMonitor {
        &self.inner.monitor
    }

    pub(crate) fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.inner.clock)
    }

    fn audit(&self, execution_id: &str, task: &str, action: AuditAction, payload: Option<String>) {
        if let Some(sink) = &self.inner.audit {
            sink.record(build_audit_event(execution_id, task, action, payload));
        }
    }

    async fn health_loop(self) {
        let mut ticker = tokio::time::interval(self.inner.config.health_check_period());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = self.inner.shutdown.cancelled() => break,
                _ = ticker.tick() => match contain(|| self.health_check()) {
                    Ok(report) => debug!(score = report.score, running = report.running, queued = report.queued, "health check"),
                    Err(panic) => error!(panic = %panic, "health check panicked"),
                },
            }
        }
        debug!("health loop stopped");
    }

    /// One health-monitor tick: sample, score, persist metrics and, when
    /// enabled, move the ceiling by one step.
    pub fn health_check(&self) -> HealthReport {
        let inner = &self.inner;
        let snapshot = inner.monitor.sample();
        let recent: Vec<ExecutionStatus> = inner.recent.lock().iter().copied().collect();
        let score = health::health_score(&snapshot, &recent);
        let running = inner.capacity.running();
        let queued = self.queue_len();
        let recommendations = health::recommendations(&snapshot, score, running, queued);

        let row = SystemMetricsRecord::from_snapshot(&snapshot, running, queued, score);
        if let Err(e) = inner.store.record_metrics(&row) {
            error!(error = %e, "failed to persist system metrics");
        }

        let scale = if inner.config.auto_scaling {
            let decision = health::scale_decision(
                score,
                &snapshot,
                queued,
                inner.capacity.target(),
                inner.config.scaling,
            );
            match decision {
                ScaleDecision::Up { from, to } => {
                    inner.capacity.scale_to(to);
                    info!(from, to, score, "auto-scaled up");
                    inner.wake.notify_one();
                }
                ScaleDecision::Down { from, to } => {
                    let effective = inner.capacity.scale_to(to);
                    warn!(from, to, effective, score, "auto-scaled down");
                }
                ScaleDecision::Hold => {}
            }
            decision
        } else {
            ScaleDecision::Hold
        };

        for rec in &recommendations {
            debug!(recommendation = %rec, "health advisory");
        }

        let report = HealthReport {
            timestamp: inner.clock.now(),
            snapshot,
            score,
            recommendations,
            running,
            queued,
            scale,
        };
        *inner.last_health.write() = Some(report.clone());
        report
    }

    /// Executions waiting for a slot.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Executions whose handler is executing right now.
    #[must_use]
    pub fn running_count(&self) -> usize {
        self.inner
            .live
            .read()
            .values()
            .filter(|e| e.lock().status == ExecutionStatus::Running)
            .count()
    }

    /// Effective concurrency ceiling.
    #[must_use]
    pub fn max_concurrent_tasks(&self) -> usize {
        self.inner.capacity.ceiling()
    }

    /// Move the ceiling by hand, within the configured scaling bounds.
    /// Returns the new effective ceiling.
    pub fn set_max_concurrent_tasks(&self, target: usize) -> usize {
        let bounds = self.inner.config.scaling;
        let target = target.clamp(bounds.min_concurrent, bounds.max_concurrent);
        let effective = self.inner.capacity.scale_to(target);
        info!(target, effective, "concurrency ceiling changed");
        self.inner.wake.notify_one();
        effective
    }

    /// Current state of one execution, live or persisted.
    #[must_use]
    pub fn execution(&self, id: &str) -> Option<TaskExecution> {
        if let Some(live) = self.inner.live.read().get(id) {
            return Some(live.lock().clone());
        }
        self.inner.store.get_execution(id).unwrap_or_else(|e| {
            error!(execution_id = id, error = %e, "execution lookup failed");
            None
        })
    }

    /// Wait until `id` reaches a terminal status or `timeout` passes.
    pub async fn wait_for(&self, id: &str, timeout: Duration) -> Option<TaskExecution> {
        let mut last = None;
        self.wait_until(timeout, |o| {
            last = o.execution(id);
            last.as_ref().is_some_and(|e| e.status.is_terminal())
        })
        .await;
        last.filter(|e| e.status.is_terminal())
    }

    async fn wait_until<F>(&self, timeout: Duration, mut done: F) -> bool
    where
        F: FnMut(&Self) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.inner.settled.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if done(self) {
                return true;
            }
            tokio::select! {
                () = &mut notified => {}
                () = tokio::time::sleep_until(deadline) => return done(self),
            }
        }
    }

    /// Most recent persisted executions, newest first.
    #[must_use]
    pub fn history(&self, limit: usize) -> Vec<ExecutionSummary> {
        match self.inner.store.recent_executions(limit) {
            Ok(rows) => rows.iter().map(TaskExecution::summary).collect(),
            Err(e) => {
                error!(error = %e, "history query failed");
                Vec::new()
            }
        }
    }

    /// Engine status snapshot.
    #[must_use]
    pub fn status(&self) -> EngineStatus {
        let capacity = self.inner.capacity.snapshot();
        let health = self.inner.last_health.read().clone();
        EngineStatus {
            is_running: self.inner.running.load(Ordering::Acquire),
            active_tasks: capacity.running,
            running_executions: self.running_count(),
            queue_size: self.queue_len(),
            registered_tasks: self.inner.registry.read().names(),
            max_concurrent_tasks: capacity.ceiling,
            target_concurrent_tasks: capacity.target,
            system_metrics: self.inner.monitor.last(),
            last_health_check: health.as_ref().map(|h| h.timestamp),
            health_score: health.as_ref().map(|h| h.score),
            recommendations: health.map(|h| h.recommendations).unwrap_or_default(),
            adaptive_learning_enabled: self.inner.config.adaptive_learning.enabled,
        }
    }

    /// Aggregate metrics over the in-memory history window.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn metrics(&self) -> MetricsSnapshot {
        let today = self.inner.clock.now().date_naive();
        let finished = self.inner.finished.lock();
        let (mut completed, mut failed, mut cancelled) = (0usize, 0usize, 0usize);
        let (mut completed_today, mut failed_today, mut cancelled_today) = (0usize, 0usize, 0usize);
        let (mut duration_sum, mut duration_n) = (0.0f64, 0usize);
        for f in finished.iter() {
            let is_today = f.completed_at.date_naive() == today;
            match f.status {
                ExecutionStatus::Completed => {
                    completed += 1;
                    completed_today += usize::from(is_today);
                    if let Some(d) = f.duration_seconds {
                        duration_sum += d;
                        duration_n += 1;
                    }
                }
                ExecutionStatus::Failed => {
                    failed += 1;
                    failed_today += usize::from(is_today);
                }
                ExecutionStatus::Cancelled => {
                    cancelled += 1;
                    cancelled_today += usize::from(is_today);
                }
                _ => {}
            }
        }
        drop(finished);
        let finished_total = completed + failed + cancelled;
        MetricsSnapshot {
            running: self.inner.capacity.running(),
            queued: self.queue_len(),
            completed_today,
            failed_today,
            cancelled_today,
            average_duration_seconds: if duration_n == 0 {
                0.0
            } else {
                duration_sum / duration_n as f64
            },
            success_rate: if finished_total == 0 {
                1.0
            } else {
                completed as f64 / finished_total as f64
            },
            health_score: self.inner.last_health.read().as_ref().map(|h| h.score),
            orphaned_executions: self.inner.orphaned.load(Ordering::Relaxed),
            max_concurrent_tasks: self.inner.capacity.ceiling(),
        }
    }

    /// Hourly success/duration profile of `task` over the learning period.
    ///
    /// # Errors
    ///
    /// `Persistence` when the store cannot be read.
    pub fn learning_profile(&self, task: &str) -> Result<Vec<HourlyProfile>, OrchestratorError> {
        let days = i64::from(self.inner.config.adaptive_learning.learning_period_days);
        let since = self.inner.clock.local_now().date() - chrono::Duration::days(days);
        let records = self.inner.store.learning_records(task, since)?;
        Ok(hourly_profile(&records))
    }

    /// Drop system metrics older than 30 days and executions older than 60.
    ///
    /// # Errors
    ///
    /// `Persistence` when the store cannot be rewritten.
    pub fn prune_history(&self) -> Result<PruneReport, OrchestratorError> {
        let now = self.inner.clock.now();
        let report = self.inner.store.prune(
            now - chrono::Duration::days(METRICS_RETENTION_DAYS),
            now - chrono::Duration::days(EXECUTION_RETENTION_DAYS),
        )?;
        info!(
            metrics = report.metrics,
            executions = report.executions,
            "pruned history"
        );
        Ok(report)
    }

    /// The configuration the engine was built with.
    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }
}
