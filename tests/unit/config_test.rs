//! Tests for configuration loading and validation

use std::io::Write;

use scan_orchestrator::config::{OrchestratorConfig, WorkerPoolConfig};
use scan_orchestrator::core::Priority;

#[test]
fn test_config_from_json_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{
            "max_concurrent_tasks": 4,
            "auto_scaling": false,
            "resource_limits": {{"cpu_threshold": 0.7}},
            "scheduler": {{
                "tick_interval_secs": 30,
                "schedules": {{"backup": {{"pattern": "0 3 * * *", "priority": "low"}}}}
            }},
            "workers": {{"worker_count": 2}}
        }}"#
    )
    .unwrap();

    let cfg = OrchestratorConfig::from_json_file(file.path()).unwrap();
    assert_eq!(cfg.max_concurrent_tasks, 4);
    assert!(!cfg.auto_scaling);
    assert!((cfg.resource_limits.cpu_threshold - 0.7).abs() < f64::EPSILON);
    assert!((cfg.resource_limits.memory_threshold - 0.85).abs() < f64::EPSILON);
    assert_eq!(cfg.scheduler.tick_interval_secs, 30);
    let backup = &cfg.scheduler.schedules["backup"];
    assert_eq!(backup.pattern.as_deref(), Some("0 3 * * *"));
    assert_eq!(backup.priority, Some(Priority::Low));
    assert_eq!(cfg.workers.worker_count, 2);
    assert_eq!(cfg.workers.max_queue_depth, 64);
}

#[test]
fn test_config_missing_file() {
    let err = OrchestratorConfig::from_json_file("/nonexistent/orchestrator.json").unwrap_err();
    assert_eq!(err.kind(), "invalid_config");
}

#[test]
fn test_config_rejects_zero_concurrency() {
    let err = OrchestratorConfig::from_json_str(r#"{"max_concurrent_tasks": 0}"#).unwrap_err();
    assert!(err.to_string().contains("max_concurrent_tasks"));
}

#[test]
fn test_config_rejects_threshold_out_of_range() {
    let err =
        OrchestratorConfig::from_json_str(r#"{"resource_limits": {"memory_threshold": 1.5}}"#)
            .unwrap_err();
    assert!(err.to_string().contains("memory_threshold"));
}

#[test]
fn test_config_rejects_malformed_json() {
    let err = OrchestratorConfig::from_json_str("{ not json").unwrap_err();
    assert!(err.to_string().starts_with("invalid configuration: parse error"));
}

#[test]
fn test_env_overrides() {
    // the only test in this binary that touches these variables
    std::env::set_var("ORCHESTRATOR_MAX_CONCURRENT_TASKS", "7");
    std::env::set_var("ORCHESTRATOR_AUTO_SCALING", "false");
    let mut cfg = OrchestratorConfig::default();
    cfg.apply_env_overrides().unwrap();
    assert_eq!(cfg.max_concurrent_tasks, 7);
    assert!(!cfg.auto_scaling);

    std::env::set_var("ORCHESTRATOR_MAX_CONCURRENT_TASKS", "many");
    let err = OrchestratorConfig::default().apply_env_overrides().unwrap_err();
    assert!(err.to_string().contains("ORCHESTRATOR_MAX_CONCURRENT_TASKS"));

    std::env::remove_var("ORCHESTRATOR_MAX_CONCURRENT_TASKS");
    std::env::remove_var("ORCHESTRATOR_AUTO_SCALING");
}

#[test]
fn test_worker_pool_config_validation() {
    assert!(WorkerPoolConfig::new().with_worker_count(0).validate().is_err());
    assert!(WorkerPoolConfig::new().with_max_queue_depth(0).validate().is_err());
    let cfg = WorkerPoolConfig::new().with_worker_count(3);
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.worker_count, 3);
}
