// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 tslock contributors

//! Error types for lock operations.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type for lock operations.
pub type Result<T> = std::result::Result<T, LockError>;

/// Errors surfaced by lock operations.
///
/// Losing a CAS race is not an error; it is retried internally.
#[derive(Error, Debug)]
pub enum LockError {
    /// The backing store failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A blocking wait was cancelled
    #[error("interrupted while waiting on lock '{key}'")]
    Interrupted { key: String },

    /// Acquisition timed out and timeout recovery is disabled
    #[error(
        "timed out after {waited:?} waiting on lock '{key}' in {} held by {holder}; \
         timeout recovery is disabled, unlock it manually",
        .path.display()
    )]
    Timeout {
        key: String,
        path: PathBuf,
        holder: String,
        waited: Duration,
    },

    /// The lock was used after `close`
    #[error("lock '{key}' is closed")]
    Closed { key: String },
}
