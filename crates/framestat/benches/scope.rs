//! Cycle scope hot-path benchmarks.
//!
//! Run with: `cargo bench --bench scope`

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use framestat::{
    CycleCounter, GroupId, Registry, ScopeCycleCounter, StatId, StatManager, StatsConfig,
    SystemClock,
};

const OUTER: StatId = StatId(300);
const INNER: StatId = StatId(301);
const HITS: StatId = StatId(302);

fn manager() -> StatManager {
    let mut registry = Registry::new();
    registry
        .declare_group("Game", GroupId::GAME)
        .and_then(|r| r.declare_cycle_stat("Outer", OUTER, GroupId::GAME))
        .and_then(|r| r.declare_cycle_stat("Inner", INNER, GroupId::GAME))
        .and_then(|r| r.declare_dword_counter("Hits", HITS, GroupId::GAME))
        .expect("bench registry");
    StatManager::new(registry, StatsConfig::default(), Arc::new(SystemClock::new()))
        .expect("bench manager")
}

fn bench_scopes(c: &mut Criterion) {
    let manager = manager();
    let mut group = c.benchmark_group("scope");
    group.throughput(Throughput::Elements(1));

    group.bench_function("push_pop", |b| {
        b.iter(|| {
            let _scope = CycleCounter::new(&manager, black_box(OUTER));
        });
    });

    group.bench_function("nested_push_pop", |b| {
        b.iter(|| {
            let _outer = CycleCounter::new(&manager, black_box(OUTER));
            let _inner = CycleCounter::new(&manager, black_box(INNER));
        });
    });

    // Nothing listens, so the predicate short-circuits.
    group.bench_function("conditional_idle", |b| {
        b.iter(|| {
            let _scope = ScopeCycleCounter::new(&manager, black_box(OUTER));
        });
    });

    group.finish();
}

fn bench_values(c: &mut Criterion) {
    let manager = manager();
    let mut group = c.benchmark_group("values");
    group.throughput(Throughput::Elements(1));

    group.bench_function("increment_dword", |b| {
        b.iter(|| manager.increment_dword(black_box(HITS), 1));
    });

    group.finish();
}

fn bench_advance(c: &mut Criterion) {
    let manager = manager();
    c.bench_function("advance_frame", |b| {
        b.iter(|| {
            {
                let _outer = CycleCounter::new(&manager, OUTER);
                manager.increment_dword(HITS, 1);
            }
            manager.advance_frame();
        });
    });
}

criterion_group!(benches, bench_scopes, bench_values, bench_advance);
criterion_main!(benches);
