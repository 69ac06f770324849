// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 tslock contributors
//
// Cancellation for blocking lock operations.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// The wait was cancelled through its [`Interrupt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("interrupted")]
pub struct Interrupted;

#[derive(Default)]
struct Inner {
    flag: Mutex<bool>,
    wake: Condvar,
}

/// A cloneable cancellation token.
///
/// Every clone observes the same flag. Setting it wakes any thread sleeping
/// in [`Interrupt::sleep`]; the flag stays set until [`Interrupt::clear`].
#[derive(Clone, Default)]
pub struct Interrupt {
    inner: Arc<Inner>,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    fn flag(&self) -> MutexGuard<'_, bool> {
        self.inner.flag.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set the flag and wake all sleepers.
    pub fn interrupt(&self) {
        *self.flag() = true;
        self.inner.wake.notify_all();
    }

    pub fn is_interrupted(&self) -> bool {
        *self.flag()
    }

    pub fn clear(&self) {
        *self.flag() = false;
    }

    /// Sleep for `dur`, returning early with `Interrupted` if the flag is
    /// (or becomes) set.
    pub fn sleep(&self, dur: Duration) -> Result<(), Interrupted> {
        // Past the end of Instant's range the sleep only ends on interrupt.
        let deadline = Instant::now().checked_add(dur);
        let mut set = self.flag();
        loop {
            if *set {
                return Err(Interrupted);
            }
            set = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(());
                    }
                    self.inner
                        .wake
                        .wait_timeout(set, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self
                    .inner
                    .wake
                    .wait(set)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }
    }
}

impl std::fmt::Debug for Interrupt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interrupt")
            .field("interrupted", &self.is_interrupted())
            .finish()
    }
}
