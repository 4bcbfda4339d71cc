//! Integration tests for the scheduler, driven by a manual clock

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Value;

use scan_orchestrator::builders::OrchestratorBuilder;
use scan_orchestrator::config::{OrchestratorConfig, ScheduleConfig, SchedulerSettings};
use scan_orchestrator::core::{
    handler_fn, AlertSource, BuiltinTask, ConditionPolicy, CronPattern, OrchestratorError,
    Priority, ResourceSnapshot, ScheduledTaskEntry, Scheduler, StaticProbe, TaskArgs, TaskHandler,
};
use scan_orchestrator::util::clock::ManualClock;
use scan_orchestrator::Orchestrator;

// Wednesday
fn at(h: u32, m: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 6, 5)
        .unwrap()
        .and_hms_opt(h, m, 0)
        .unwrap()
}

fn noop() -> Arc<dyn TaskHandler> {
    handler_fn(|_| async { anyhow::Ok(Value::Null) })
}

fn engine(clock: &Arc<ManualClock>, probe: Arc<StaticProbe>, tasks: &[BuiltinTask]) -> Orchestrator {
    let config = OrchestratorConfig {
        auto_scaling: false,
        ..OrchestratorConfig::default()
    };
    tasks
        .iter()
        .fold(
            OrchestratorBuilder::new(config)
                .probe(probe)
                .clock(clock.clone()),
            |b, t| b.task(t.definition(noop())),
        )
        .build()
        .unwrap()
}

/// Alert backend whose first read blows up.
#[derive(Default)]
struct FlakyAlerts {
    calls: AtomicU32,
}

impl AlertSource for FlakyAlerts {
    fn critical_alerts(&self) -> anyhow::Result<u32> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            panic!("alert index unavailable");
        }
        Ok(0)
    }
}

/// quick_scan gated on the alert count, cleanup unconditional; both every 5 minutes.
fn flaky_setup() -> (Arc<ManualClock>, Orchestrator, Scheduler) {
    let clock = Arc::new(ManualClock::new(at(8, 59)));
    let engine = OrchestratorBuilder::new(OrchestratorConfig {
        auto_scaling: false,
        ..OrchestratorConfig::default()
    })
    .probe(Arc::new(StaticProbe::default()))
    .alerts(Arc::new(FlakyAlerts::default()))
    .clock(clock.clone())
    .task(BuiltinTask::QuickScan.definition(noop()))
    .task(BuiltinTask::Cleanup.definition(noop()))
    .build()
    .unwrap();
    let scheduler = Scheduler::new(
        engine.clone(),
        &SchedulerSettings {
            builtin_schedules: false,
            ..SchedulerSettings::default()
        },
    )
    .unwrap();
    let mut gated = ScheduledTaskEntry::new("quick_scan", CronPattern::parse("*/5 * * * *").unwrap());
    gated.conditions = Some(ConditionPolicy {
        max_critical_alerts: Some(3),
        ..ConditionPolicy::default()
    });
    scheduler.add_entry(gated).unwrap();
    scheduler
        .add_entry(ScheduledTaskEntry::new("cleanup", CronPattern::parse("*/5 * * * *").unwrap()))
        .unwrap();
    (clock, engine, scheduler)
}

fn setup(tasks: &[BuiltinTask]) -> (Arc<ManualClock>, Orchestrator, Scheduler) {
    let clock = Arc::new(ManualClock::new(at(8, 59)));
    let engine = engine(&clock, Arc::new(StaticProbe::default()), tasks);
    let scheduler = Scheduler::new(engine.clone(), &SchedulerSettings::default()).unwrap();
    (clock, engine, scheduler)
}

#[test]
fn test_builtin_entries_only_for_registered_tasks() {
    let (_, _, scheduler) = setup(&[BuiltinTask::ReportGeneration, BuiltinTask::HealthCheck]);
    let mut names: Vec<String> = scheduler.entries().into_iter().map(|e| e.task_name).collect();
    names.sort();
    assert_eq!(names, vec!["health_check", "report_generation"]);
    assert_eq!(scheduler.status().total_entries, 2);
}

#[test]
fn test_next_run_for_hour_list() {
    let (clock, _, scheduler) = setup(&[BuiltinTask::ReportGeneration]);
    let runs = scheduler.next_runs(chrono::Duration::hours(24));
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].next_run, at(9, 0));

    clock.set(at(9, 1));
    let runs = scheduler.next_runs(chrono::Duration::hours(24));
    assert_eq!(runs[0].next_run, at(14, 0));

    // outside the window
    assert!(scheduler.next_runs(chrono::Duration::hours(1)).is_empty());
}

#[test]
fn test_next_runs_are_time_sorted() {
    let (_, _, scheduler) = setup(&[
        BuiltinTask::ReportGeneration,
        BuiltinTask::HealthCheck,
        BuiltinTask::SubdomainDiscovery,
    ]);
    let runs = scheduler.next_runs(chrono::Duration::hours(6));
    let times: Vec<NaiveDateTime> = runs.iter().map(|r| r.next_run).collect();
    let mut sorted = times.clone();
    sorted.sort();
    assert_eq!(times, sorted);
    assert_eq!(runs[0].task_name, "health_check");
    assert_eq!(runs[0].next_run, at(9, 0));
    assert!(runs.iter().any(|r| r.task_name == "subdomain_discovery" && r.next_run == at(12, 0)));
}

#[test]
fn test_tick_submits_due_entries_once() {
    let (_, engine, scheduler) = setup(&[BuiltinTask::ReportGeneration, BuiltinTask::HealthCheck]);

    let report = scheduler.tick_at(at(9, 0));
    assert_eq!(report.submitted.len(), 2);
    assert!(report.skipped.is_empty());
    assert!(report.failed.is_empty());
    assert_eq!(engine.queue_len(), 2);

    // same instant again: nothing new in the window
    assert!(scheduler.tick_at(at(9, 0)).submitted.is_empty());

    let report = scheduler.tick_at(at(9, 3));
    assert!(report.submitted.is_empty());

    let report = scheduler.tick_at(at(9, 5));
    assert_eq!(report.submitted.len(), 1);
    assert!(report.submitted[0].starts_with("exec_health_check_"));

    let entries = scheduler.entries();
    let health = entries.iter().find(|e| e.task_name == "health_check").unwrap();
    assert_eq!(health.run_count, 2);
    assert!(health.last_run.is_some());
    let reports = entries.iter().find(|e| e.task_name == "report_generation").unwrap();
    assert_eq!(reports.run_count, 1);
    assert_eq!(scheduler.status().scheduled_submissions, 3);
}

#[test]
fn test_scheduled_priority_reaches_execution() {
    let (_, engine, scheduler) = setup(&[BuiltinTask::VulnerabilityScan]);
    // Sunday 02:00
    let sunday = NaiveDate::from_ymd_opt(2024, 6, 9)
        .unwrap()
        .and_hms_opt(2, 0, 0)
        .unwrap();
    let report = scheduler.tick_at(sunday);
    assert_eq!(report.submitted.len(), 1);
    let execution = engine.execution(&report.submitted[0]).unwrap();
    assert_eq!(execution.priority, Priority::High);
}

#[test]
fn test_unmet_conditions_skip_the_run() {
    let clock = Arc::new(ManualClock::new(at(8, 59)));
    let probe = Arc::new(StaticProbe::new(ResourceSnapshot::new(50.0, 0.3, 0.4)));
    let engine = engine(&clock, probe.clone(), &[BuiltinTask::Backup]);
    let mut schedules = HashMap::new();
    schedules.insert(
        "backup".to_string(),
        ScheduleConfig {
            pattern: Some("0 9 * * *".into()),
            ..ScheduleConfig::default()
        },
    );
    let settings = SchedulerSettings {
        schedules,
        ..SchedulerSettings::default()
    };
    let scheduler = Scheduler::new(engine.clone(), &settings).unwrap();

    // backup wants load under 30%
    let report = scheduler.tick_at(at(9, 0));
    assert_eq!(report.skipped, vec!["backup".to_string()]);
    assert_eq!(engine.queue_len(), 0);
    let entry = scheduler.entries().pop().unwrap();
    assert_eq!(entry.run_count, 0);

    probe.set_cpu(10.0);
    let next_day = at(9, 0) + chrono::Duration::days(1);
    assert_eq!(scheduler.tick_at(next_day).submitted.len(), 1);
}

#[test]
fn test_panicking_entry_does_not_block_the_tick() {
    let (_, engine, scheduler) = flaky_setup();

    let report = scheduler.tick_at(at(9, 0));
    assert_eq!(report.failed, vec!["quick_scan".to_string()]);
    assert_eq!(report.submitted.len(), 1);
    assert!(report.submitted[0].starts_with("exec_cleanup_"));

    // the alert source recovered; both fire on the next slot
    let report = scheduler.tick_at(at(9, 5));
    assert_eq!(report.submitted.len(), 2);
    assert!(report.failed.is_empty());
    assert_eq!(engine.queue_len(), 3);
    assert_eq!(scheduler.status().scheduled_submissions, 3);
    let quick = scheduler
        .entries()
        .into_iter()
        .find(|e| e.task_name == "quick_scan")
        .unwrap();
    assert_eq!(quick.run_count, 1);
}

#[test]
fn test_disable_keeps_history_and_stops_firing() {
    let (_, _, scheduler) = setup(&[BuiltinTask::HealthCheck]);
    assert_eq!(scheduler.tick_at(at(9, 0)).submitted.len(), 1);

    scheduler.disable_task("health_check").unwrap();
    assert!(scheduler.tick_at(at(9, 5)).submitted.is_empty());
    assert!(scheduler.next_runs(chrono::Duration::hours(1)).is_empty());
    let entry = scheduler.entries().pop().unwrap();
    assert!(!entry.enabled);
    assert_eq!(entry.run_count, 1);
    assert!(entry.next_run.is_none());

    scheduler.enable_task("health_check").unwrap();
    assert_eq!(scheduler.tick_at(at(9, 10)).submitted.len(), 1);
    assert_eq!(scheduler.status().enabled_entries, 1);

    assert_eq!(
        scheduler.disable_task("backup").unwrap_err(),
        OrchestratorError::UnknownTask("backup".into())
    );
}

#[test]
fn test_update_pattern_accepts_unsupported_forms() {
    let (_, _, scheduler) = setup(&[BuiltinTask::Cleanup]);
    scheduler.update_pattern("cleanup", "15 10 * * *").unwrap();
    let entry = scheduler.entries().pop().unwrap();
    assert_eq!(entry.pattern, "15 10 * * *");
    assert!(!entry.supported);
    assert!(scheduler.tick_at(at(10, 15)).submitted.is_empty());

    let err = scheduler.update_pattern("cleanup", "daily").unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidPattern { .. }));

    scheduler.update_pattern("cleanup", "*/30 * * * *").unwrap();
    assert_eq!(scheduler.tick_at(at(10, 30)).submitted.len(), 1);
}

#[test]
fn test_config_errors() {
    let clock = Arc::new(ManualClock::new(at(8, 59)));
    let engine = engine(&clock, Arc::new(StaticProbe::default()), &[BuiltinTask::Cleanup]);

    let mut schedules = HashMap::new();
    schedules.insert("backup".to_string(), ScheduleConfig::default());
    let settings = SchedulerSettings {
        schedules,
        ..SchedulerSettings::default()
    };
    assert_eq!(
        Scheduler::new(engine.clone(), &settings).unwrap_err(),
        OrchestratorError::UnknownTask("backup".into())
    );

    // a custom entry needs a pattern
    let settings = SchedulerSettings {
        builtin_schedules: false,
        schedules: HashMap::from([("cleanup".to_string(), ScheduleConfig::default())]),
        ..SchedulerSettings::default()
    };
    assert!(matches!(
        Scheduler::new(engine.clone(), &settings).unwrap_err(),
        OrchestratorError::InvalidConfig(_)
    ));

    let scheduler = Scheduler::new(
        engine,
        &SchedulerSettings {
            builtin_schedules: false,
            ..SchedulerSettings::default()
        },
    )
    .unwrap();
    assert!(scheduler.entries().is_empty());
    let entry = ScheduledTaskEntry::new("cleanup", CronPattern::parse("0 1 * * *").unwrap());
    scheduler.add_entry(entry.clone()).unwrap();
    assert_eq!(
        scheduler.add_entry(entry).unwrap_err(),
        OrchestratorError::DuplicateTask("cleanup".into())
    );
}

#[test]
fn test_entry_conditions_travel_with_submission() {
    let clock = Arc::new(ManualClock::new(at(8, 59)));
    let engine = engine(&clock, Arc::new(StaticProbe::default()), &[BuiltinTask::QuickScan]);
    let settings = SchedulerSettings {
        builtin_schedules: false,
        schedules: HashMap::from([(
            "quick_scan".to_string(),
            ScheduleConfig {
                pattern: Some("*/30 * * * *".into()),
                enabled: Some(true),
                priority: Some(Priority::Critical),
                conditions: Some(ConditionPolicy {
                    allowed_hours: Some(vec![9]),
                    ..ConditionPolicy::default()
                }),
            },
        )]),
        ..SchedulerSettings::default()
    };
    let scheduler = Scheduler::new(engine.clone(), &settings).unwrap();

    let report = scheduler.tick_at(at(9, 0));
    assert_eq!(report.submitted.len(), 1);
    assert_eq!(
        engine.execution(&report.submitted[0]).unwrap().priority,
        Priority::Critical
    );
    // 10:00 is outside the allowed hours
    assert_eq!(scheduler.tick_at(at(10, 0)).skipped, vec!["quick_scan".to_string()]);
}

#[tokio::test]
async fn test_manual_submission_is_counted() {
    let (_, engine, scheduler) = setup(&[BuiltinTask::Cleanup]);
    let id = scheduler
        .schedule_manual("cleanup", Duration::ZERO, TaskArgs::new())
        .unwrap();
    assert!(engine.execution(&id).is_some());
    assert_eq!(scheduler.status().manual_submissions, 1);
    assert_eq!(scheduler.status().scheduled_submissions, 0);
    assert!(scheduler
        .schedule_manual("full_scan", Duration::ZERO, TaskArgs::new())
        .is_err());
}

#[tokio::test(start_paused = true)]
async fn test_tick_loop_follows_the_clock() {
    let (clock, engine, scheduler) = setup(&[BuiltinTask::HealthCheck]);
    clock.set(at(9, 1));
    scheduler.start().unwrap();
    assert!(scheduler.status().is_running);

    clock.set(at(9, 5));
    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(engine.queue_len(), 1);
    assert_eq!(scheduler.status().scheduled_submissions, 1);

    scheduler.stop().await;
    assert!(!scheduler.status().is_running);
    clock.set(at(9, 10));
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(engine.queue_len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_tick_loop_survives_a_panicking_tick() {
    let (clock, engine, scheduler) = flaky_setup();
    clock.set(at(9, 1));
    scheduler.start().unwrap();

    clock.set(at(9, 5));
    tokio::time::sleep(Duration::from_secs(61)).await;
    assert!(scheduler.status().is_running);
    assert_eq!(scheduler.status().scheduled_submissions, 1);

    clock.set(at(9, 10));
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(scheduler.status().scheduled_submissions, 3);
    assert_eq!(engine.queue_len(), 3);
    scheduler.stop().await;
}
