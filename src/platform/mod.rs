// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 tslock contributors

#[cfg(unix)]
pub mod posix;

// Re-export the platform-specific implementations under a uniform name.

#[cfg(unix)]
pub use posix::{current_pid, is_pid_alive, FileLock, PlatformMap};

#[cfg(not(unix))]
compile_error!("tslock needs a unix target (mmap, flock, kill)");
