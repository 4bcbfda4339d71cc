//! Tests for error types

use std::time::Duration;

use scan_orchestrator::core::OrchestratorError;
use scan_orchestrator::infra::StoreError;
use scan_orchestrator::workers::{WorkerError, WorkerType};

#[test]
fn test_unknown_task_error() {
    let err = OrchestratorError::UnknownTask("nightly_scan".to_string());
    assert_eq!(format!("{}", err), "unknown task: nightly_scan");
    assert_eq!(err.kind(), "unknown_task");
}

#[test]
fn test_timeout_error() {
    let err = OrchestratorError::Timeout(Duration::from_secs(600));
    assert_eq!(format!("{}", err), "timeout after 600s");
    assert_eq!(err.kind(), "timeout");
}

#[test]
fn test_invalid_pattern_error() {
    let err = OrchestratorError::InvalidPattern {
        pattern: "0 0".to_string(),
        reason: "expected 5 fields, found 2".to_string(),
    };
    assert_eq!(
        format!("{}", err),
        "invalid schedule pattern `0 0`: expected 5 fields, found 2"
    );
}

#[test]
fn test_store_error_becomes_persistence() {
    let err: OrchestratorError = StoreError::Backend("disk full".to_string()).into();
    assert_eq!(err, OrchestratorError::Persistence("backend error: disk full".to_string()));
    assert_eq!(err.kind(), "persistence_error");
}

#[test]
fn test_worker_errors() {
    let err = WorkerError::UnknownSubtype {
        worker_type: WorkerType::Scan,
        subtype: "stealth".to_string(),
    };
    assert_eq!(format!("{}", err), "unknown subtype `stealth` for scan worker");
    assert_eq!(format!("{}", WorkerError::QueueFull), "worker queue is full");
}

#[test]
fn test_handler_error_into_anyhow() {
    let err = anyhow::Error::from(OrchestratorError::Handler("exit code 2".to_string()));
    assert_eq!(err.to_string(), "handler error: exit code 2");
}
