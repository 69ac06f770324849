// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 tslock contributors
//
// The seam between a lock and the store that persists its state.

use std::io;
use std::path::Path;

/// Cell value meaning "no holder". Every other value is a holder's pid.
pub const UNLOCKED: i64 = i64::MIN;

/// A single named 64-bit value living in shared, persisted memory.
///
/// Once any process has attached to a cell it is only ever mutated through
/// `compare_and_swap_value`.
pub trait LockCell: Send + Sync {
    /// Current value (acquire ordering).
    fn get_value(&self) -> i64;

    /// Atomically replace `expected` with `new`. Returns whether the swap
    /// took effect.
    fn compare_and_swap_value(&self, expected: i64, new: i64) -> bool;

    /// Release this process's handle. The persisted value is untouched.
    /// Closing an already closed handle reports an error.
    fn close(&self) -> io::Result<()>;
}

/// A durable key → cell table shared between processes.
pub trait CellStore: Send + Sync {
    type Cell: LockCell;

    /// Attach to the cell named `key`, allocating it as unlocked if this is
    /// the first attach in the store's lifetime.
    fn acquire_cell(&self, key: &str) -> io::Result<Self::Cell>;

    /// Run `f` while holding the store's cross-process exclusive scope.
    fn do_with_exclusive_lock<R, F>(&self, f: F) -> io::Result<R>
    where
        F: FnOnce(&Self) -> io::Result<R>;

    /// Location of the store, for diagnostics.
    fn path(&self) -> &Path;
}
