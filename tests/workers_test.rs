//! Integration tests for worker pools
//!
//! - Bounded queue rejection
//! - Pools registered as engine handlers
//! - Per-worker status and manager roll-up

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::Semaphore;

use scan_orchestrator::builders::OrchestratorBuilder;
use scan_orchestrator::config::{OrchestratorConfig, WorkerPoolConfig};
use scan_orchestrator::core::{
    handler_fn, BuiltinTask, ExecutionStatus, HandlerContext, ScheduleRequest, StaticProbe,
    TaskArgs,
};
use scan_orchestrator::workers::{
    PoolHandler, ReportKind, ScanKind, WorkItem, WorkKind, WorkerBuilder, WorkerError,
    WorkerManager, WorkerPool, WorkerState, WorkerType,
};

// ============================================================================
// HELPERS
// ============================================================================

/// Scan handlers that hold until the gate hands out a permit.
fn gated_scans(gate: &Arc<Semaphore>) -> WorkerBuilder<ScanKind> {
    ScanKind::ALL.iter().fold(WorkerBuilder::new(), |b, kind| {
        let gate = Arc::clone(gate);
        b.bind(
            *kind,
            handler_fn(move |ctx: HandlerContext| {
                let gate = Arc::clone(&gate);
                async move {
                    let _permit = gate.acquire().await?;
                    anyhow::Ok(json!({"scan": ctx.task_name}))
                }
            }),
        )
    })
}

fn reports() -> WorkerBuilder<ReportKind> {
    ReportKind::ALL.iter().fold(WorkerBuilder::new(), |b, kind| {
        b.bind(
            *kind,
            handler_fn(|ctx: HandlerContext| async move {
                match ctx.args.get("format").and_then(Value::as_str) {
                    Some("pdf") => anyhow::bail!("pdf renderer not installed"),
                    _ => Ok(json!({"report": ctx.task_name})),
                }
            }),
        )
    })
}

fn item(id: &str, subtype: &str) -> WorkItem {
    WorkItem::new(id, subtype, TaskArgs::new())
}

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

// ============================================================================
// QUEUEING
// ============================================================================

#[tokio::test]
async fn test_full_queue_rejects_instead_of_blocking() {
    let gate = Arc::new(Semaphore::new(0));
    let pool = WorkerPool::new(
        WorkerPoolConfig::new()
            .with_worker_count(1)
            .with_max_queue_depth(1),
        &gated_scans(&gate),
    )
    .unwrap();

    let first = pool.submit(item("s1", "full")).unwrap();
    eventually(|| pool.stats().active_tasks == 1).await;
    let statuses = pool.worker_statuses();
    assert_eq!(statuses[0].state, WorkerState::Busy);
    assert_eq!(statuses[0].current_task.as_deref(), Some("s1"));

    let second = pool.submit(item("s2", "quick")).unwrap();
    assert_eq!(
        pool.submit(item("s3", "deep")).unwrap_err(),
        WorkerError::QueueFull
    );
    let stats = pool.stats();
    assert_eq!(stats.queued_tasks, 1);
    assert_eq!(stats.submitted_tasks, 2);

    gate.add_permits(2);
    let a = first.wait().await.unwrap();
    let b = second.wait().await.unwrap();
    assert!(a.success && b.success);
    assert_eq!(a.worker_id, "scan_worker_0");
    assert_eq!(b.result, Some(json!({"scan": "quick"})));
    assert_eq!(pool.stats().completed_tasks, 2);
    pool.shutdown();
}

#[tokio::test]
async fn test_unknown_subtype_is_reported() {
    let pool = WorkerPool::new(WorkerPoolConfig::new().with_worker_count(1), &reports()).unwrap();
    let err = pool.run(item("r1", "weekly_digest")).await.unwrap_err();
    assert_eq!(
        err,
        WorkerError::UnknownSubtype {
            worker_type: WorkerType::Report,
            subtype: "weekly_digest".into(),
        }
    );
    pool.shutdown();
}

#[test]
fn test_builder_requires_every_subtype() {
    let partial = WorkerBuilder::<ScanKind>::new()
        .bind(ScanKind::Quick, handler_fn(|_| async { anyhow::Ok(Value::Null) }));
    let err = WorkerPool::new(WorkerPoolConfig::new().with_worker_count(1), &partial).unwrap_err();
    assert!(matches!(err, WorkerError::UnboundSubtype(_)));
}

// ============================================================================
// ENGINE INTEGRATION
// ============================================================================

#[tokio::test]
async fn test_pool_backed_tasks_run_through_engine() {
    let gate = Arc::new(Semaphore::new(100));
    let scans = Arc::new(
        WorkerPool::new(WorkerPoolConfig::new().with_worker_count(2), &gated_scans(&gate)).unwrap(),
    );
    let report_pool =
        Arc::new(WorkerPool::new(WorkerPoolConfig::new().with_worker_count(1), &reports()).unwrap());

    let engine = OrchestratorBuilder::new(OrchestratorConfig {
        auto_scaling: false,
        ..OrchestratorConfig::default()
    })
    .probe(Arc::new(StaticProbe::default()))
    .task(BuiltinTask::QuickScan.definition(PoolHandler::shared(&scans, ScanKind::Quick)))
    .task(
        BuiltinTask::ReportGeneration
            .definition(PoolHandler::shared(&report_pool, ReportKind::SecuritySummary))
            .with_max_retries(0),
    )
    .build()
    .unwrap();
    engine.start().unwrap();

    let id = engine.schedule(ScheduleRequest::new("quick_scan")).unwrap();
    let record = engine.wait_for(&id, Duration::from_secs(10)).await.unwrap();
    assert_eq!(record.status, ExecutionStatus::Completed);
    assert_eq!(record.result, Some(json!({"scan": "quick"})));
    assert!(record.worker_id.unwrap().starts_with("scan_worker_"));

    let mut args = TaskArgs::new();
    args.insert("format".into(), Value::from("pdf"));
    let id = engine
        .schedule(ScheduleRequest::new("report_generation").with_args(args))
        .unwrap();
    let record = engine.wait_for(&id, Duration::from_secs(10)).await.unwrap();
    assert_eq!(record.status, ExecutionStatus::Failed);
    assert!(record.error.unwrap().contains("pdf renderer not installed"));
    assert_eq!(record.worker_id.as_deref(), Some("report_worker_0"));

    let manager = WorkerManager::new();
    manager.register(scans.clone()).unwrap();
    manager.register(report_pool.clone()).unwrap();
    let status = manager.status();
    assert_eq!(status.registered_pools, 2);
    assert_eq!(status.total_workers, 3);
    assert_eq!(status.total_tasks_processed, 2);
    assert_eq!(status.failed_tasks, 1);
    let report_worker = status
        .workers
        .iter()
        .find(|w| w.worker_type == WorkerType::Report)
        .unwrap();
    assert_eq!(report_worker.state, WorkerState::Error);
    assert_eq!(report_worker.metrics.tasks_failed, 1);

    engine.shutdown(Duration::from_secs(5)).await;
    manager.shutdown();
}
