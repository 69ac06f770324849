// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 tslock contributors
//
// Structured records for the rare, dangerous lock events (forced unlocks,
// stuck recovery, timeouts). These are the only side channel a lock has
// besides the cell value itself.

use std::fmt;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::cell::UNLOCKED;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Debug,
    Warn,
}

/// One diagnostic record emitted by a lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockEvent {
    /// An administrative CAS `holder → UNLOCKED`; `unlocked` is the outcome.
    ForcedUnlock {
        key: String,
        path: PathBuf,
        holder: i64,
        unlocked: bool,
    },
    /// The recovery loop found a dead holder and is about to reclaim.
    RecoveryAttempt {
        key: String,
        path: PathBuf,
        holder: i64,
    },
    /// The recovery loop has failed `retries` times in a row.
    RecoveryStalled {
        key: String,
        path: PathBuf,
        holder: i64,
        retries: u64,
    },
    /// Releasing found a value other than our own pid.
    UnlockMismatch {
        key: String,
        path: PathBuf,
        expected: i64,
        found: i64,
    },
    /// Acquisition gave up waiting; `forcing` says whether the holder is
    /// about to be forced out.
    LockTimeout {
        key: String,
        path: PathBuf,
        holder: i64,
        waited: Duration,
        forcing: bool,
    },
}

impl LockEvent {
    pub fn severity(&self) -> Severity {
        match self {
            LockEvent::RecoveryAttempt { .. } => Severity::Debug,
            _ => Severity::Warn,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            LockEvent::ForcedUnlock { key, .. }
            | LockEvent::RecoveryAttempt { key, .. }
            | LockEvent::RecoveryStalled { key, .. }
            | LockEvent::UnlockMismatch { key, .. }
            | LockEvent::LockTimeout { key, .. } => key,
        }
    }

    /// The holder the event is about (`found` for an unlock mismatch).
    pub fn holder(&self) -> i64 {
        match self {
            LockEvent::ForcedUnlock { holder, .. }
            | LockEvent::RecoveryAttempt { holder, .. }
            | LockEvent::RecoveryStalled { holder, .. }
            | LockEvent::LockTimeout { holder, .. } => *holder,
            LockEvent::UnlockMismatch { found, .. } => *found,
        }
    }
}

/// Render a cell value for humans.
pub(crate) struct Holder(pub i64);

impl fmt::Display for Holder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == UNLOCKED {
            f.write_str("none")
        } else {
            write!(f, "pid={}", self.0)
        }
    }
}

impl fmt::Display for LockEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockEvent::ForcedUnlock {
                key,
                path,
                holder,
                unlocked,
            } => write!(
                f,
                "forced unlock of lock={key} in file={} holder {}, unlocked: {unlocked}",
                path.display(),
                Holder(*holder)
            ),
            LockEvent::RecoveryAttempt { key, path, holder } => write!(
                f,
                "reclaiming lock={key} in file={} from dead holder {}",
                path.display(),
                Holder(*holder)
            ),
            LockEvent::RecoveryStalled {
                key,
                path,
                holder,
                retries,
            } => write!(
                f,
                "unable to release lock={key} in file={} held by {} after {retries} retries",
                path.display(),
                Holder(*holder)
            ),
            LockEvent::UnlockMismatch {
                key,
                path,
                expected,
                found,
            } => {
                if *found == UNLOCKED {
                    write!(
                        f,
                        "lock={key} in file={} was already unlocked (expected {})",
                        path.display(),
                        Holder(*expected)
                    )
                } else {
                    write!(
                        f,
                        "lock={key} in file={} is held by {} not {}",
                        path.display(),
                        Holder(*found),
                        Holder(*expected)
                    )
                }
            }
            LockEvent::LockTimeout {
                key,
                path,
                holder,
                waited,
                forcing,
            } => write!(
                f,
                "timed out after {waited:?} acquiring lock={key} in file={} held by {}, {}",
                path.display(),
                Holder(*holder),
                if *forcing {
                    "unlocking forcibly"
                } else {
                    "recovery disabled"
                }
            ),
        }
    }
}

/// Destination for lock diagnostics.
pub trait DiagnosticSink: Send + Sync {
    fn record(&self, event: &LockEvent);
}

/// Forwards every event to the `log` facade under target `tslock`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl DiagnosticSink for LogSink {
    fn record(&self, event: &LockEvent) {
        match event.severity() {
            Severity::Debug => log::debug!(target: "tslock", "{event}"),
            Severity::Warn => log::warn!(target: "tslock", "{event}"),
        }
    }
}

/// Keeps every event in memory, in emission order.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Mutex<Vec<LockEvent>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LockEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of recorded events at `severity` or above.
    pub fn count_at_least(&self, severity: Severity) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.severity() >= severity)
            .count()
    }
}

impl DiagnosticSink for EventLog {
    fn record(&self, event: &LockEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forced_unlock_names_everything() {
        let e = LockEvent::ForcedUnlock {
            key: "queue.write.lock".into(),
            path: PathBuf::from("/tmp/q/metadata.tslock"),
            holder: 4242,
            unlocked: false,
        };
        let s = e.to_string();
        assert!(s.contains("queue.write.lock"));
        assert!(s.contains("/tmp/q/metadata.tslock"));
        assert!(s.contains("pid=4242"));
        assert!(s.contains("unlocked: false"));
        assert_eq!(e.severity(), Severity::Warn);
    }

    #[test]
    fn unlocked_holder_renders_as_none() {
        let e = LockEvent::UnlockMismatch {
            key: "k".into(),
            path: PathBuf::from("p"),
            expected: 7,
            found: UNLOCKED,
        };
        assert!(e.to_string().contains("already unlocked"));
        assert_eq!(e.holder(), UNLOCKED);
    }

    #[test]
    fn event_log_filters_by_severity() {
        let log = EventLog::new();
        log.record(&LockEvent::RecoveryAttempt {
            key: "k".into(),
            path: PathBuf::new(),
            holder: 1,
        });
        log.record(&LockEvent::RecoveryStalled {
            key: "k".into(),
            path: PathBuf::new(),
            holder: 1,
            retries: 1000,
        });
        assert_eq!(log.len(), 2);
        assert_eq!(log.count_at_least(Severity::Warn), 1);
        assert_eq!(log.count_at_least(Severity::Debug), 2);
        assert_eq!(log.events()[1].key(), "k");
    }
}
