// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 tslock contributors
//
// Lock-path benchmarks over a real memory-mapped table store.
//
// Run with:
//   cargo bench --bench lock
//
// Groups:
//   cell:        raw get / CAS on a mapped value
//   write_lock:  uncontended lock + unlock round trip
//   recovery:    recovery loop on a free lock and on a live holder

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use tslock::{
    current_pid, BusyPauser, EventLog, Interrupt, LockCell, LockConfig, QueueLock, TableStore,
    WriteLock, UNLOCKED,
};

fn bench_cell(c: &mut Criterion) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = TableStore::open(dir.path().join("bench_cell.tslock")).expect("open");
    let cell = store.acquire_value_for("bench.cell").expect("cell");
    let pid = current_pid();

    let mut group = c.benchmark_group("cell");
    group.bench_function("get_value", |b| b.iter(|| black_box(cell.get_value())));
    group.bench_function("cas_pair", |b| {
        b.iter(|| {
            black_box(cell.compare_and_swap_value(UNLOCKED, pid));
            black_box(cell.compare_and_swap_value(pid, UNLOCKED));
        })
    });
    group.finish();
}

fn bench_write_lock(c: &mut Criterion) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(TableStore::open(dir.path().join("bench_wl.tslock")).expect("open"));
    let wl = WriteLock::new(store, BusyPauser::new, LockConfig::default()).expect("write lock");
    let interrupt = Interrupt::new();

    let mut group = c.benchmark_group("write_lock");
    group.bench_function("lock_unlock", |b| {
        b.iter(|| {
            wl.lock(&interrupt).expect("lock");
            wl.unlock().expect("unlock");
        })
    });
    group.finish();
}

fn bench_recovery(c: &mut Criterion) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("bench_recovery.tslock");
    let store = Arc::new(TableStore::open(&path).expect("open"));
    let lock = QueueLock::create("bench.recovery", Arc::clone(&store), BusyPauser::new, LockConfig::default())
        .expect("lock")
        .with_sink(Arc::new(EventLog::new()));
    let interrupt = Interrupt::new();

    let mut group = c.benchmark_group("recovery");
    group.bench_function("free", |b| {
        b.iter(|| black_box(lock.force_unlock_if_process_is_dead(&interrupt).expect("recover")))
    });

    let cell = store.acquire_value_for("bench.recovery").expect("cell");
    assert!(cell.compare_and_swap_value(UNLOCKED, current_pid()));
    group.bench_function("live_holder", |b| {
        b.iter(|| black_box(lock.force_unlock_if_process_is_dead(&interrupt).expect("recover")))
    });
    group.finish();
}

criterion_group!(benches, bench_cell, bench_write_lock, bench_recovery);
criterion_main!(benches);
