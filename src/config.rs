// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 tslock contributors
//
// Per-lock configuration, with process-wide defaults taken from the
// environment once.

use std::sync::OnceLock;
use std::time::Duration;

/// Set (to anything but a false value) to make lock timeouts fail instead of
/// forcing the holder out.
pub const DONT_RECOVER_LOCK_TIMEOUT_ENV: &str = "TSLOCK_DONT_RECOVER_LOCK_TIMEOUT";
/// Acquisition timeout in milliseconds.
pub const LOCK_TIMEOUT_ENV: &str = "TSLOCK_LOCK_TIMEOUT_MS";

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_RETRY_SLEEP: Duration = Duration::from_millis(1);
pub const DEFAULT_WARN_EVERY: u64 = 1000;

/// How a lock waits, and whether it may recover from a timeout by force.
///
/// A lock copies its config at construction; changing the environment later
/// has no effect on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockConfig {
    /// Fail acquisition on timeout instead of forcing the holder out.
    pub dont_recover_lock_timeout: bool,
    /// How long acquisition spins before the timeout policy applies.
    pub lock_timeout: Duration,
    /// Sleep between failed reclaim attempts in the recovery loop.
    pub retry_sleep: Duration,
    /// The recovery loop warns after every this many failed attempts.
    pub warn_every: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            dont_recover_lock_timeout: false,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            retry_sleep: DEFAULT_RETRY_SLEEP,
            warn_every: DEFAULT_WARN_EVERY,
        }
    }
}

impl LockConfig {
    /// Defaults overlaid with the environment, read once per process.
    pub fn from_env() -> Self {
        static FROM_ENV: OnceLock<LockConfig> = OnceLock::new();
        FROM_ENV
            .get_or_init(|| Self::from_vars(|name| std::env::var(name).ok()))
            .clone()
    }

    /// Defaults overlaid with whatever `var` returns for the known names.
    pub fn from_vars<F>(var: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(v) = var(DONT_RECOVER_LOCK_TIMEOUT_ENV) {
            config.dont_recover_lock_timeout = parse_flag(&v);
        }
        if let Some(v) = var(LOCK_TIMEOUT_ENV) {
            match v.trim().parse::<u64>() {
                Ok(ms) => config.lock_timeout = Duration::from_millis(ms),
                Err(_) => log::warn!("ignoring {LOCK_TIMEOUT_ENV}={v:?}: not a number of milliseconds"),
            }
        }
        config
    }

    pub fn with_dont_recover_lock_timeout(mut self, dont_recover: bool) -> Self {
        self.dont_recover_lock_timeout = dont_recover;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_retry_sleep(mut self, sleep: Duration) -> Self {
        self.retry_sleep = sleep;
        self
    }

    /// Values below 1 are raised to 1.
    pub fn with_warn_every(mut self, every: u64) -> Self {
        self.warn_every = every.max(1);
        self
    }
}

/// A present-but-empty variable counts as set.
fn parse_flag(v: &str) -> bool {
    let v = v.trim();
    v.is_empty()
        || ["1", "true", "yes", "on"]
            .iter()
            .any(|t| v.eq_ignore_ascii_case(t))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        move |name| {
            pairs
                .iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn defaults_without_env() {
        let c = LockConfig::from_vars(|_| None);
        assert_eq!(c, LockConfig::default());
        assert!(!c.dont_recover_lock_timeout);
        assert_eq!(c.warn_every, 1000);
    }

    #[test]
    fn flag_spellings() {
        for on in ["", "1", "true", "TRUE", "yes", "On"] {
            assert!(parse_flag(on), "{on:?}");
        }
        for off in ["0", "false", "no", "off", "nope"] {
            assert!(!parse_flag(off), "{off:?}");
        }
    }

    #[test]
    fn env_overrides() {
        let c = LockConfig::from_vars(vars(&[
            (DONT_RECOVER_LOCK_TIMEOUT_ENV, "true"),
            (LOCK_TIMEOUT_ENV, "250"),
        ]));
        assert!(c.dont_recover_lock_timeout);
        assert_eq!(c.lock_timeout, Duration::from_millis(250));
    }

    #[test]
    fn bad_timeout_is_ignored() {
        let c = LockConfig::from_vars(vars(&[(LOCK_TIMEOUT_ENV, "soon")]));
        assert_eq!(c.lock_timeout, DEFAULT_LOCK_TIMEOUT);
    }

    #[test]
    fn warn_every_never_zero() {
        assert_eq!(LockConfig::default().with_warn_every(0).warn_every, 1);
    }
}
