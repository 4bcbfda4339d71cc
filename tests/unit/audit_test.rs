//! Tests for audit sinks

use scan_orchestrator::core::audit::{build_audit_event, AuditAction, AuditSink, InMemoryAuditSink};

#[test]
fn test_in_memory_audit_sink_records_events() {
    let sink = InMemoryAuditSink::new(10);
    sink.record(build_audit_event("exec_1", "backup", AuditAction::Submit, None));
    sink.record(build_audit_event(
        "exec_1",
        "backup",
        AuditAction::Fail,
        Some("handler error: boom".to_string()),
    ));

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].action, AuditAction::Submit);
    assert_eq!(events[1].payload.as_deref(), Some("handler error: boom"));
    assert_ne!(events[0].event_id, events[1].event_id);
}

#[test]
fn test_in_memory_audit_sink_drops_oldest() {
    let sink = InMemoryAuditSink::new(3);
    for i in 0..5 {
        sink.record(build_audit_event(format!("exec_{i}"), "cleanup", AuditAction::Complete, None));
    }
    let ids: Vec<String> = sink.events().into_iter().map(|e| e.execution_id).collect();
    assert_eq!(ids, vec!["exec_2", "exec_3", "exec_4"]);
}

#[test]
fn test_audit_action_serializes_snake_case() {
    let json = serde_json::to_string(&AuditAction::Detach).unwrap();
    assert_eq!(json, "\"detach\"");
}
