//! Benchmarks for the dispatch queue and the schedule pattern evaluator.
//!
//! - Priority queue push/pop under mixed priorities
//! - Next-run lookup for each supported pattern form
//! - Window checks as performed on every scheduler tick

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;

use chrono::{Duration, NaiveDate, NaiveDateTime};

use scan_orchestrator::core::{CronPattern, ExecutionQueue, Priority};

fn start() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 6, 5)
        .and_then(|d| d.and_hms_opt(8, 59, 0))
        .unwrap()
}

fn priority_for(i: u64) -> Priority {
    match i % 4 {
        0 => Priority::Critical,
        1 => Priority::High,
        2 => Priority::Medium,
        _ => Priority::Low,
    }
}

// ============================================================================
// Queue Benchmarks
// ============================================================================

fn bench_queue_push_pop(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_push_pop");

    for size in [100u64, 1_000, 10_000] {
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let mut q = ExecutionQueue::new();
                for i in 0..size {
                    q.push(priority_for(i), i);
                }
                while let Some(id) = q.pop() {
                    black_box(id);
                }
            });
        });
    }
    group.finish();
}

fn bench_queue_interleaved(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_interleaved");

    // steady state: the queue holds a backlog while slots free up one at a time
    for backlog in [10u64, 100, 1_000] {
        group.bench_with_input(
            BenchmarkId::from_parameter(backlog),
            &backlog,
            |b, &backlog| {
                let mut q = ExecutionQueue::new();
                for i in 0..backlog {
                    q.push(priority_for(i), i);
                }
                let mut next = backlog;
                b.iter(|| {
                    q.push(priority_for(next), next);
                    next += 1;
                    black_box(q.pop());
                });
            },
        );
    }
    group.finish();
}

// ============================================================================
// Pattern Benchmarks
// ============================================================================

fn bench_pattern_next_after(c: &mut Criterion) {
    let mut group = c.benchmark_group("pattern_next_after");
    let at = start();

    for raw in [
        "*/5 * * * *",
        "0 2 * * *",
        "0 9,14 * * *",
        "0 */6 * * *",
        "0 2 * * 0",
        "0 9,14 * * 1,3,5",
    ] {
        let pattern = CronPattern::parse(raw).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(raw), &pattern, |b, p| {
            b.iter(|| black_box(p.next_after(black_box(at))));
        });
    }
    group.finish();
}

fn bench_pattern_tick_window(c: &mut Criterion) {
    let mut group = c.benchmark_group("pattern_tick_window");
    let patterns: Vec<CronPattern> = ["*/5 * * * *", "0 2 * * *", "0 9,14 * * *", "0 2 * * 0"]
        .iter()
        .map(|raw| CronPattern::parse(raw).unwrap())
        .collect();

    // one simulated day of one-minute ticks across every entry
    group.throughput(Throughput::Elements(24 * 60));
    group.bench_function("one_day", |b| {
        b.iter(|| {
            let mut last = start();
            let mut due = 0usize;
            for _ in 0..24 * 60 {
                let now = last + Duration::minutes(1);
                due += patterns.iter().filter(|p| p.fires_between(last, now)).count();
                last = now;
            }
            black_box(due)
        });
    });
    group.finish();
}

criterion_group!(queue_benches, bench_queue_push_pop, bench_queue_interleaved);

criterion_group!(
    pattern_benches,
    bench_pattern_next_after,
    bench_pattern_tick_window
);

criterion_main!(queue_benches, pattern_benches);
