//! Tests for builder modules

use std::sync::Arc;

use scan_orchestrator::builders::OrchestratorBuilder;
use scan_orchestrator::config::OrchestratorConfig;
use scan_orchestrator::core::{
    handler_fn, BuiltinTask, OrchestratorError, Priority, ScheduleRequest, StaticProbe,
    TaskDefinition, TaskRegistry,
};

fn noop() -> Arc<dyn scan_orchestrator::core::TaskHandler> {
    handler_fn(|_| async { Ok(serde_json::Value::Null) })
}

#[test]
fn test_builder_defaults() {
    let engine = OrchestratorBuilder::new(OrchestratorConfig::default())
        .probe(Arc::new(StaticProbe::default()))
        .task(TaskDefinition::new("cleanup", noop()))
        .build()
        .unwrap();
    assert_eq!(engine.max_concurrent_tasks(), 5);
    assert_eq!(engine.queue_len(), 0);
    assert!(engine.is_registered("cleanup"));
    assert!(!engine.status().is_running);
}

#[test]
fn test_builder_rejects_duplicate_task() {
    let err = OrchestratorBuilder::new(OrchestratorConfig::default())
        .probe(Arc::new(StaticProbe::default()))
        .task(TaskDefinition::new("cleanup", noop()))
        .task(TaskDefinition::new("cleanup", noop()))
        .build()
        .unwrap_err();
    assert_eq!(err, OrchestratorError::DuplicateTask("cleanup".to_string()));
}

#[test]
fn test_builder_rejects_invalid_config() {
    let config = OrchestratorConfig {
        max_concurrent_tasks: 0,
        ..OrchestratorConfig::default()
    };
    let err = OrchestratorBuilder::new(config).build().unwrap_err();
    assert_eq!(err.kind(), "invalid_config");
}

#[test]
fn test_builder_applies_task_priorities() {
    let mut config = OrchestratorConfig::default();
    config
        .task_priorities
        .insert("backup".to_string(), Priority::Critical);
    let registry = TaskRegistry::with_builtins([(BuiltinTask::Backup, noop())]).unwrap();
    let engine = OrchestratorBuilder::new(config)
        .registry(registry)
        .probe(Arc::new(StaticProbe::default()))
        .build()
        .unwrap();
    assert_eq!(engine.status().registered_tasks, vec!["backup".to_string()]);

    // not started, so the submission stays queued
    let id = engine.schedule(ScheduleRequest::new("backup")).unwrap();
    assert_eq!(engine.queue_len(), 1);
    assert_eq!(engine.execution(&id).unwrap().priority, Priority::Critical);
}
