// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 tslock contributors
//
// The queue's append lock: taken by a process that needs exclusive access
// to the tail, and waited on (without taking it) by appenders that only
// need the tail to be quiescent.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use crate::cell::{CellStore, LockCell, UNLOCKED};
use crate::config::LockConfig;
use crate::error::Result;
use crate::interrupt::Interrupt;
use crate::liveness::current_pid;
use crate::pauser::Pauser;
use crate::queue_lock::{QueueLock, Recovery, Spin};

/// Store key of the append lock.
pub const APPEND_LOCK_KEY: &str = "queue.append.lock";

/// Cross-process append lock, reentrant for the thread that took it.
pub struct AppendLock<S: CellStore> {
    inner: QueueLock<S>,
    pid: i64,
    owner: Mutex<Option<ThreadId>>,
}

impl<S: CellStore> AppendLock<S> {
    pub fn new<F, P>(store: Arc<S>, pauser: F, config: LockConfig) -> Result<Self>
    where
        F: FnOnce() -> P,
        P: Pauser + 'static,
    {
        Ok(Self::from_lock(QueueLock::create(
            APPEND_LOCK_KEY,
            store,
            pauser,
            config,
        )?))
    }

    pub fn from_lock(inner: QueueLock<S>) -> Self {
        Self {
            inner,
            pid: current_pid(),
            owner: Mutex::new(None),
        }
    }

    fn owner(&self) -> MutexGuard<'_, Option<ThreadId>> {
        self.owner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn held_by_current_thread(&self) -> bool {
        *self.owner() == Some(thread::current().id()) && self.inner.cell().get_value() == self.pid
    }

    /// Take the lock. Returns at once if the calling thread already holds
    /// it. On timeout the holder is forced out (or `Timeout` returned when
    /// timeout recovery is disabled).
    pub fn acquire_lock(&self, interrupt: &Interrupt) -> Result<()> {
        self.inner.ensure_open()?;
        if self.held_by_current_thread() {
            return Ok(());
        }
        let pid = self.pid;
        loop {
            match self
                .inner
                .spin_until(interrupt, |cell| cell.compare_and_swap_value(UNLOCKED, pid))?
            {
                Spin::Done => break,
                Spin::TimedOut { holder, waited } => {
                    self.inner.recover_from_timeout(holder, waited)?
                }
            }
        }
        *self.owner() = Some(thread::current().id());
        Ok(())
    }

    /// Wait until the lock is free or held by this process, without
    /// taking it. A holder that outlasts `lock_timeout` is forced out.
    pub fn wait_for_lock(&self, interrupt: &Interrupt) -> Result<()> {
        self.inner.ensure_open()?;
        let pid = self.pid;
        loop {
            match self.inner.spin_until(interrupt, |cell| {
                let v = cell.get_value();
                v == UNLOCKED || v == pid
            })? {
                Spin::Done => return Ok(()),
                Spin::TimedOut { holder, waited } => {
                    self.inner.recover_from_timeout(holder, waited)?
                }
            }
        }
    }

    /// Release the lock; a mismatch is reported as a warning.
    pub fn unlock(&self) -> Result<()> {
        let mut owner = self.owner();
        self.inner.release(self.pid)?;
        *owner = None;
        Ok(())
    }

    pub fn is_locked(&self) -> Result<bool> {
        self.inner.is_locked()
    }

    pub fn force_unlock_if_process_is_dead(&self, interrupt: &Interrupt) -> Result<Recovery> {
        self.inner.force_unlock_if_process_is_dead(interrupt)
    }

    pub fn close(&self) -> bool {
        self.inner.close()
    }

    pub fn queue_lock(&self) -> &QueueLock<S> {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::{EventLog, LockEvent};
    use crate::error::LockError;
    use crate::pauser::BusyPauser;
    use crate::queue_lock::tests::MemStore;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn append_lock(store: &Arc<MemStore>, config: LockConfig) -> (AppendLock<MemStore>, Arc<EventLog>) {
        let log = Arc::new(EventLog::new());
        let inner = QueueLock::create(APPEND_LOCK_KEY, Arc::clone(store), BusyPauser::new, config)
            .unwrap()
            .with_sink(log.clone());
        (AppendLock::from_lock(inner), log)
    }

    fn short() -> LockConfig {
        LockConfig::default().with_lock_timeout(Duration::from_millis(30))
    }

    #[test]
    fn reentrant_for_the_owning_thread() {
        let store = MemStore::new();
        let (al, log) = append_lock(&store, short());
        let interrupt = Interrupt::new();
        al.acquire_lock(&interrupt).unwrap();
        al.acquire_lock(&interrupt).unwrap();
        assert!(al.is_locked().unwrap());
        assert_eq!(store.cell.cas_calls.load(Ordering::Relaxed), 1);
        al.unlock().unwrap();
        assert!(!al.is_locked().unwrap());
        assert!(log.is_empty());
    }

    #[test]
    fn wait_returns_when_free_or_ours() {
        let store = MemStore::new();
        let (al, _log) = append_lock(&store, short());
        let interrupt = Interrupt::new();
        al.wait_for_lock(&interrupt).unwrap();
        store.cell.value.store(current_pid(), Ordering::Relaxed);
        al.wait_for_lock(&interrupt).unwrap();
        assert_eq!(store.cell.value.load(Ordering::Relaxed), current_pid());
    }

    #[test]
    fn wait_forces_out_a_stale_holder() {
        let store = MemStore::new();
        store.cell.value.store(999_999, Ordering::Relaxed);
        let (al, log) = append_lock(&store, short());
        al.wait_for_lock(&Interrupt::new()).unwrap();
        assert_eq!(store.cell.value.load(Ordering::Relaxed), UNLOCKED);
        assert!(log
            .events()
            .iter()
            .any(|e| matches!(e, LockEvent::ForcedUnlock { unlocked: true, .. })));
    }

    #[test]
    fn wait_without_recovery_times_out() {
        let store = MemStore::new();
        store.cell.value.store(999_999, Ordering::Relaxed);
        let (al, _log) = append_lock(&store, short().with_dont_recover_lock_timeout(true));
        assert!(matches!(
            al.wait_for_lock(&Interrupt::new()),
            Err(LockError::Timeout { .. })
        ));
        assert!(matches!(
            al.acquire_lock(&Interrupt::new()),
            Err(LockError::Timeout { .. })
        ));
    }

    #[test]
    fn other_thread_must_wait() {
        let store = MemStore::new();
        let (al, _log) = append_lock(&store, short().with_dont_recover_lock_timeout(true));
        let al = Arc::new(al);
        al.acquire_lock(&Interrupt::new()).unwrap();
        let other = {
            let al = Arc::clone(&al);
            thread::spawn(move || al.acquire_lock(&Interrupt::new()))
        };
        assert!(matches!(
            other.join().unwrap(),
            Err(LockError::Timeout { .. })
        ));
        al.unlock().unwrap();
    }
}
