// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 tslock contributors
//
// A real process takes the write lock and exits without releasing it; the
// parent must see the abandoned lock and reclaim it.
//
// The child is this test binary re-executed with a filter selecting the
// helper test below and the store path in the environment.

use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use tslock::{
    current_pid, AdaptivePauser, BusyPauser, EventLog, Interrupt, LockConfig, LockEvent,
    OsProcessOracle, ProcessOracle, QueueLock, Recovery, TableStore, WriteLock, WRITE_LOCK_KEY,
};

const CHILD_STORE_ENV: &str = "TSLOCK_TEST_CHILD_STORE";

// Runs only in the child; a no-op in a normal test run.
#[test]
fn child_takes_write_lock_and_exits() {
    let Ok(path) = std::env::var(CHILD_STORE_ENV) else {
        return;
    };
    let store = Arc::new(TableStore::open(path).expect("child open"));
    let wl = WriteLock::new(store, AdaptivePauser::new, LockConfig::default()).expect("child lock");
    wl.lock(&Interrupt::new()).expect("child take lock");
    assert!(wl.is_locked_by_current_process().unwrap());
    // Leave without unlocking, as a crash would.
    std::process::exit(0);
}

/// Run the child against `store`; returns its (now dead) pid.
fn crash_while_holding(store: &Path) -> i64 {
    let exe = std::env::current_exe().expect("current_exe");
    let mut child = Command::new(exe)
        .args(["child_takes_write_lock_and_exits", "--exact", "--test-threads=1"])
        .env(CHILD_STORE_ENV, store)
        .spawn()
        .expect("spawn child");
    let pid = child.id() as i64;
    let status = child.wait().expect("wait child");
    assert!(status.success(), "child failed: {status}");
    pid
}

#[test]
fn abandoned_write_lock_is_reclaimed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("abandoned.tslock");
    let child_pid = crash_while_holding(&path);
    assert_ne!(child_pid, current_pid());
    assert!(!OsProcessOracle.is_process_alive(child_pid));

    let store = Arc::new(TableStore::open(&path).unwrap());
    let log = Arc::new(EventLog::new());
    let lock = QueueLock::create(WRITE_LOCK_KEY, store, BusyPauser::new, LockConfig::default())
        .unwrap()
        .with_sink(log.clone());
    assert_eq!(lock.current_holder().unwrap(), Some(child_pid));

    let r = lock.force_unlock_if_process_is_dead(&Interrupt::new()).unwrap();
    assert_eq!(r, Recovery::Reclaimed(child_pid));
    assert_eq!(lock.current_holder().unwrap(), None);
    assert!(matches!(
        log.events()[..],
        [LockEvent::RecoveryAttempt { holder, .. }] if holder == child_pid
    ));
}

#[test]
fn abandoned_write_lock_times_out_into_forced_unlock() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("timeout.tslock");
    let child_pid = crash_while_holding(&path);

    let store = Arc::new(TableStore::open(&path).unwrap());
    let log = Arc::new(EventLog::new());
    let config = LockConfig::default().with_lock_timeout(Duration::from_millis(50));
    let inner = QueueLock::create(WRITE_LOCK_KEY, store, AdaptivePauser::new, config)
        .unwrap()
        .with_sink(log.clone());
    let wl = WriteLock::from_lock(inner);

    wl.lock(&Interrupt::new()).unwrap();
    assert_eq!(wl.locked_by().unwrap(), "me");
    assert!(log.events().iter().any(|e| matches!(
        e,
        LockEvent::ForcedUnlock { holder, unlocked: true, .. } if *holder == child_pid
    )));
    wl.unlock().unwrap();
    assert!(!wl.locked().unwrap());
}
