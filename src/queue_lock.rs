// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 tslock contributors
//
// Process-level advisory lock whose state is one cell of a persisted store.
// The holder is identified by its pid, so a lock abandoned by a crashed
// process can be recognised and reclaimed by anyone else.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::cell::{CellStore, LockCell, UNLOCKED};
use crate::config::LockConfig;
use crate::diagnostics::{DiagnosticSink, Holder, LockEvent, LogSink};
use crate::error::{LockError, Result};
use crate::interrupt::Interrupt;
use crate::liveness::{OsProcessOracle, ProcessOracle};
use crate::pauser::Pauser;

/// Outcome of [`QueueLock::force_unlock_if_process_is_dead`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Nobody held the lock; nothing was done.
    Free,
    /// The holder is still running; the cell was not touched.
    HeldByLiveProcess(i64),
    /// The holder was dead and its pid was swapped out for `UNLOCKED`.
    Reclaimed(i64),
}

/// How a timed spin ended.
pub(crate) enum Spin {
    Done,
    TimedOut { holder: i64, waited: Duration },
}

/// The lock primitive shared by the concrete write and append locks.
///
/// Safe to share between threads: every mutation of the cell is a CAS, and
/// the cell is already shared with other processes.
pub struct QueueLock<S: CellStore> {
    lock: S::Cell,
    store: Arc<S>,
    pauser: Mutex<Box<dyn Pauser>>,
    path: PathBuf,
    lock_key: String,
    config: LockConfig,
    oracle: Box<dyn ProcessOracle>,
    sink: Arc<dyn DiagnosticSink>,
    closed: AtomicBool,
}

impl<S: CellStore> QueueLock<S> {
    /// Attach to (allocating if absent) the cell `lock_key` of `store`.
    ///
    /// The cell is acquired inside the store's exclusive scope so racing
    /// first-time creators cannot corrupt it. No lock is taken.
    pub fn create<F, P>(lock_key: &str, store: Arc<S>, pauser: F, config: LockConfig) -> Result<Self>
    where
        F: FnOnce() -> P,
        P: Pauser + 'static,
    {
        let lock = store.do_with_exclusive_lock(|ts| ts.acquire_cell(lock_key))?;
        let path = store.path().to_path_buf();
        Ok(Self {
            lock,
            store,
            pauser: Mutex::new(Box::new(pauser())),
            path,
            lock_key: lock_key.to_owned(),
            config,
            oracle: Box::new(OsProcessOracle),
            sink: Arc::new(LogSink),
            closed: AtomicBool::new(false),
        })
    }

    /// Replace the liveness oracle (default: the operating system).
    pub fn with_oracle(mut self, oracle: impl ProcessOracle + 'static) -> Self {
        self.oracle = Box::new(oracle);
        self
    }

    /// Replace the diagnostic sink (default: the `log` facade).
    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn lock_key(&self) -> &str {
        &self.lock_key
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    pub fn dont_recover_lock_timeout(&self) -> bool {
        self.config.dont_recover_lock_timeout
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Raw cell value: `UNLOCKED` or the holder's pid.
    pub fn lock_value(&self) -> Result<i64> {
        self.ensure_open()?;
        Ok(self.lock.get_value())
    }

    /// Pid of the current holder, `None` when unlocked.
    pub fn current_holder(&self) -> Result<Option<i64>> {
        let value = self.lock_value()?;
        Ok((value != UNLOCKED).then_some(value))
    }

    pub fn is_locked(&self) -> Result<bool> {
        Ok(self.lock_value()? != UNLOCKED)
    }

    /// Administrative override: CAS `expected_holder → UNLOCKED` without
    /// checking whether the holder is alive.
    ///
    /// Always emits exactly one [`LockEvent::ForcedUnlock`] recording the
    /// outcome. Returns whether the swap took effect; it does not if the
    /// cell no longer holds `expected_holder`.
    pub fn force_unlock(&self, expected_holder: i64) -> Result<bool> {
        self.ensure_open()?;
        let unlocked = self.lock.compare_and_swap_value(expected_holder, UNLOCKED);
        self.sink.record(&LockEvent::ForcedUnlock {
            key: self.lock_key.clone(),
            path: self.path.clone(),
            holder: expected_holder,
            unlocked,
        });
        Ok(unlocked)
    }

    /// Reclaim the lock if its holder process is no longer running.
    ///
    /// Returns at once when the lock is free or the holder is alive; it does
    /// not wait for a live holder to release. A dead holder is swapped out
    /// with a CAS, retrying after `retry_sleep` when the CAS loses a race and
    /// warning every `warn_every` failed attempts. The only way out of a
    /// stuck loop is `interrupt`, reported as [`LockError::Interrupted`].
    pub fn force_unlock_if_process_is_dead(&self, interrupt: &Interrupt) -> Result<Recovery> {
        self.ensure_open()?;
        let mut retries = 0u64;
        loop {
            let pid = self.lock.get_value();
            if pid == UNLOCKED {
                return Ok(Recovery::Free);
            }
            if self.oracle.is_process_alive(pid) {
                return Ok(Recovery::HeldByLiveProcess(pid));
            }

            self.sink.record(&LockEvent::RecoveryAttempt {
                key: self.lock_key.clone(),
                path: self.path.clone(),
                holder: pid,
            });
            if self.lock.compare_and_swap_value(pid, UNLOCKED) {
                return Ok(Recovery::Reclaimed(pid));
            }

            retries += 1;
            if retries % self.config.warn_every.max(1) == 0 {
                self.sink.record(&LockEvent::RecoveryStalled {
                    key: self.lock_key.clone(),
                    path: self.path.clone(),
                    holder: pid,
                    retries,
                });
            }
            interrupt
                .sleep(self.config.retry_sleep)
                .map_err(|_| self.interrupted())?;
        }
    }

    /// Release this process's handle to the cell. Never fails loudly.
    ///
    /// Returns `true` if this call released the handle cleanly, `false` if
    /// the lock was already closed or the release reported an error (which
    /// is logged and otherwise ignored). Callers must not rely on this to
    /// learn about release failures. The persisted value is left as is.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        match self.lock.close() {
            Ok(()) => true,
            Err(e) => {
                log::warn!(
                    "failed to release lock={} in file={}: {e}",
                    self.lock_key,
                    self.path.display()
                );
                false
            }
        }
    }

    // -----------------------------------------------------------------------
    // Building blocks for the concrete locks
    // -----------------------------------------------------------------------

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(LockError::Closed {
                key: self.lock_key.clone(),
            });
        }
        Ok(())
    }

    pub(crate) fn cell(&self) -> &S::Cell {
        &self.lock
    }

    pub(crate) fn sink(&self) -> &dyn DiagnosticSink {
        self.sink.as_ref()
    }

    pub(crate) fn interrupted(&self) -> LockError {
        LockError::Interrupted {
            key: self.lock_key.clone(),
        }
    }

    fn pauser(&self) -> MutexGuard<'_, Box<dyn Pauser>> {
        self.pauser.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spin with the pauser until `done` succeeds or `lock_timeout` passes.
    /// The pauser is reset before and after.
    pub(crate) fn spin_until<F>(&self, interrupt: &Interrupt, mut done: F) -> Result<Spin>
    where
        F: FnMut(&S::Cell) -> bool,
    {
        self.ensure_open()?;
        let mut pauser = self.pauser();
        pauser.reset();
        let outcome = loop {
            if done(&self.lock) {
                break Ok(Spin::Done);
            }
            if interrupt.is_interrupted() {
                break Err(self.interrupted());
            }
            if let Err(timeout) = pauser.pause_with_timeout(self.config.lock_timeout) {
                break Ok(Spin::TimedOut {
                    holder: self.lock.get_value(),
                    waited: timeout.waited,
                });
            }
        };
        pauser.reset();
        outcome
    }

    /// Apply the timeout policy: fail when recovery is disabled, otherwise
    /// warn and force `holder` out so the caller can retry. A lock that was
    /// released in the meantime is simply retried.
    pub(crate) fn recover_from_timeout(&self, holder: i64, waited: Duration) -> Result<()> {
        let forcing = !self.config.dont_recover_lock_timeout;
        self.sink.record(&LockEvent::LockTimeout {
            key: self.lock_key.clone(),
            path: self.path.clone(),
            holder,
            waited,
            forcing,
        });
        if holder == UNLOCKED {
            return Ok(());
        }
        if !forcing {
            return Err(LockError::Timeout {
                key: self.lock_key.clone(),
                path: self.path.clone(),
                holder: Holder(holder).to_string(),
                waited,
            });
        }
        self.force_unlock(holder)?;
        Ok(())
    }

    /// Swap `owner → UNLOCKED`, reporting (not failing) when the cell held
    /// something else.
    pub(crate) fn release(&self, owner: i64) -> Result<bool> {
        self.ensure_open()?;
        if self.lock.compare_and_swap_value(owner, UNLOCKED) {
            return Ok(true);
        }
        self.sink.record(&LockEvent::UnlockMismatch {
            key: self.lock_key.clone(),
            path: self.path.clone(),
            expected: owner,
            found: self.lock.get_value(),
        });
        Ok(false)
    }
}

impl<S: CellStore> Drop for QueueLock<S> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<S: CellStore> std::fmt::Debug for QueueLock<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueLock")
            .field("lock_key", &self.lock_key)
            .field("path", &self.path)
            .field("holder", &Holder(self.lock.get_value()).to_string())
            .field("closed", &self.is_closed())
            .finish()
    }
}
