//! Tests for the query models

use std::sync::Arc;

use scan_orchestrator::builders::OrchestratorBuilder;
use scan_orchestrator::config::OrchestratorConfig;
use scan_orchestrator::core::{handler_fn, ResourceSnapshot, StaticProbe, TaskDefinition};
use scan_orchestrator::runtime::{EngineStatus, MetricsSnapshot};

fn engine() -> scan_orchestrator::Orchestrator {
    OrchestratorBuilder::new(OrchestratorConfig::default())
        .probe(Arc::new(StaticProbe::new(ResourceSnapshot::new(20.0, 0.4, 0.5))))
        .task(TaskDefinition::new(
            "health_check",
            handler_fn(|_| async { Ok(serde_json::Value::Null) }),
        ))
        .build()
        .unwrap()
}

#[test]
fn test_status_serializes() {
    let engine = engine();
    engine.health_check();
    let status = engine.status();
    assert!(status.health_score.is_some());
    assert!(status.last_health_check.is_some());
    assert!(status.system_metrics.is_some());

    let json = serde_json::to_value(&status).unwrap();
    assert_eq!(json["registered_tasks"][0], "health_check");
    assert_eq!(json["max_concurrent_tasks"], 5);
    let back: EngineStatus = serde_json::from_value(json).unwrap();
    assert_eq!(back.registered_tasks, status.registered_tasks);
}

#[test]
fn test_metrics_empty_history() {
    let metrics: MetricsSnapshot = engine().metrics();
    assert_eq!(metrics.completed_today, 0);
    assert!((metrics.success_rate - 1.0).abs() < f64::EPSILON);
    assert!(metrics.average_duration_seconds.abs() < f64::EPSILON);
    assert_eq!(metrics.orphaned_executions, 0);
    assert!(metrics.health_score.is_none());
}
