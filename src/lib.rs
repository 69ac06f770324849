// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 tslock contributors
//
// Crash-recoverable process lock persisted in a memory-mapped table store.
// The holder of a lock is the pid written into a shared 64-bit cell, so the
// lock outlives its holder and can be reclaimed once that process is gone.

mod platform;

mod cell;
pub use cell::{CellStore, LockCell, UNLOCKED};

mod table_store;
pub use table_store::{LongValue, TableStore, DEFAULT_CAPACITY, MAX_KEY_LEN};

mod liveness;
pub use liveness::{current_pid, OsProcessOracle, ProcessOracle};

mod pauser;
pub use pauser::{AdaptivePauser, BusyPauser, PauseTimeout, Pauser};

mod interrupt;
pub use interrupt::{Interrupt, Interrupted};

pub mod diagnostics;
pub use diagnostics::{DiagnosticSink, EventLog, LockEvent, LogSink, Severity};

pub mod config;
pub use config::LockConfig;

mod error;
pub use error::{LockError, Result};

mod queue_lock;
pub use queue_lock::{QueueLock, Recovery};

mod write_lock;
pub use write_lock::{WriteLock, WRITE_LOCK_KEY};

mod append_lock;
pub use append_lock::{AppendLock, APPEND_LOCK_KEY};
