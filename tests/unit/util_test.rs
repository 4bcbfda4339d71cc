//! Tests for utility functions

use chrono::{Duration, NaiveDate, Timelike};
use scan_orchestrator::core::Priority;
use scan_orchestrator::util::{init_tracing, now_ms, Clock, ManualClock};

#[test]
fn test_priority_ordering() {
    assert!(Priority::Critical > Priority::High);
    assert!(Priority::High > Priority::Medium);
    assert!(Priority::Medium > Priority::Low);
    assert_eq!(Priority::default(), Priority::Medium);
}

#[test]
fn test_priority_parsing() {
    assert_eq!("HIGH".parse::<Priority>().unwrap(), Priority::High);
    assert_eq!("normal".parse::<Priority>().unwrap(), Priority::Medium);
    assert!("urgent".parse::<Priority>().is_err());
    assert_eq!(serde_json::to_string(&Priority::Critical).unwrap(), "\"critical\"");
}

#[test]
fn test_manual_clock() {
    let start = NaiveDate::from_ymd_opt(2024, 3, 4)
        .unwrap()
        .and_hms_opt(8, 59, 0)
        .unwrap();
    let clock = ManualClock::new(start);
    assert_eq!(clock.local_now(), start);
    assert_eq!(clock.now().naive_utc(), start);

    clock.advance(Duration::minutes(2));
    assert_eq!(clock.local_now().hour(), 9);
    assert_eq!(clock.local_now().minute(), 1);

    clock.set(start);
    assert_eq!(clock.local_now(), start);
}

#[test]
fn test_now_ms_is_monotonic_enough() {
    let a = now_ms();
    let b = now_ms();
    assert!(b >= a);
    assert!(a > 1_600_000_000_000);
}

#[test]
fn test_init_tracing_twice() {
    init_tracing();
    init_tracing();
}
