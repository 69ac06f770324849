// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 tslock contributors
//
// The queue's write lock: held by one process at a time while it appends.

use std::sync::Arc;

use crate::cell::{CellStore, LockCell, UNLOCKED};
use crate::config::LockConfig;
use crate::error::Result;
use crate::interrupt::Interrupt;
use crate::liveness::current_pid;
use crate::pauser::Pauser;
use crate::queue_lock::{QueueLock, Recovery, Spin};

/// Store key of the write lock.
pub const WRITE_LOCK_KEY: &str = "queue.write.lock";

/// Exclusive cross-process write lock.
///
/// Not reentrant: a second `lock` from the same process spins until the
/// timeout policy applies.
pub struct WriteLock<S: CellStore> {
    inner: QueueLock<S>,
    pid: i64,
}

impl<S: CellStore> WriteLock<S> {
    pub fn new<F, P>(store: Arc<S>, pauser: F, config: LockConfig) -> Result<Self>
    where
        F: FnOnce() -> P,
        P: Pauser + 'static,
    {
        Ok(Self::from_lock(QueueLock::create(
            WRITE_LOCK_KEY,
            store,
            pauser,
            config,
        )?))
    }

    /// Wrap an already configured lock (custom key, sink or oracle).
    pub fn from_lock(inner: QueueLock<S>) -> Self {
        Self {
            inner,
            pid: current_pid(),
        }
    }

    /// Take the lock, spinning until it is free.
    ///
    /// After `lock_timeout` the holder is forced out and acquisition starts
    /// over, unless the config disables timeout recovery, in which case this
    /// fails with `Timeout`.
    pub fn lock(&self, interrupt: &Interrupt) -> Result<()> {
        let pid = self.pid;
        loop {
            match self
                .inner
                .spin_until(interrupt, |cell| cell.compare_and_swap_value(UNLOCKED, pid))?
            {
                Spin::Done => return Ok(()),
                Spin::TimedOut { holder, waited } => {
                    self.inner.recover_from_timeout(holder, waited)?
                }
            }
        }
    }

    /// One attempt, no waiting.
    pub fn try_lock(&self) -> Result<bool> {
        self.inner.ensure_open()?;
        Ok(self.inner.cell().compare_and_swap_value(UNLOCKED, self.pid))
    }

    /// Release the lock. Finding it unlocked or held by someone else is
    /// reported as a warning, not an error.
    pub fn unlock(&self) -> Result<()> {
        self.inner.release(self.pid)?;
        Ok(())
    }

    pub fn locked(&self) -> Result<bool> {
        self.inner.is_locked()
    }

    pub fn is_locked_by_current_process(&self) -> Result<bool> {
        Ok(self.inner.lock_value()? == self.pid)
    }

    /// `"me"`, `"none"`, or the holder's pid.
    pub fn locked_by(&self) -> Result<String> {
        Ok(match self.inner.lock_value()? {
            UNLOCKED => "none".to_owned(),
            v if v == self.pid => "me".to_owned(),
            v => v.to_string(),
        })
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
