// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 tslock contributors
//
// Process liveness, consulted before reclaiming a lock
// from its recorded holder.

use crate::platform;

/// Answers whether a process id currently names a running process.
///
/// Must tolerate any id, including ones that were never valid on this host.
pub trait ProcessOracle: Send + Sync {
    fn is_process_alive(&self, pid: i64) -> bool;
}

/// Liveness as reported by the operating system (`kill(pid, 0)`).
#[derive(Debug, Default, Clone, Copy)]
pub struct OsProcessOracle;

impl ProcessOracle for OsProcessOracle {
    fn is_process_alive(&self, pid: i64) -> bool {
        platform::is_pid_alive(pid)
    }
}

impl<F> ProcessOracle for F
where
    F: Fn(i64) -> bool + Send + Sync,
{
    fn is_process_alive(&self, pid: i64) -> bool {
        self(pid)
    }
}

/// Id of the calling process, as written into a cell by a holder.
pub fn current_pid() -> i64 {
    platform::current_pid()
}
