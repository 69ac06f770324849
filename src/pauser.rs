// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 tslock contributors
//
// Backoff strategies for spin-waiting on a lock cell.
// The cell lives in memory shared across processes, so there is no kernel
// object to block on; waiters pause with increasing delay instead.

use std::time::{Duration, Instant};

/// Returned by [`Pauser::pause_with_timeout`] once the time spent pausing
/// since the last reset reaches the timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("paused for {waited:?}")]
pub struct PauseTimeout {
    pub waited: Duration,
}

/// A resettable busy-wait strategy.
pub trait Pauser: Send {
    /// Start over: next pause is the shortest, timeout clock is cleared.
    fn reset(&mut self);

    /// Pause once, a little longer than last time.
    fn pause(&mut self);

    /// Pause once, or fail if `timeout` has elapsed since the first pause
    /// after the last reset.
    fn pause_with_timeout(&mut self, timeout: Duration) -> Result<(), PauseTimeout>;

    /// Time since the first pause after the last reset.
    fn time_paused(&self) -> Duration;
}

/// One rung of the backoff ladder for attempt `k`: a few free retries, then
/// CPU pause hints, then yields, then 1ms sleeps once the holder is clearly
/// not about to let go. `k` stops climbing at the sleep rung.
#[inline]
fn adaptive_yield(k: &mut u32) {
    match *k {
        0..=3 => {}
        4..=15 => std::hint::spin_loop(),
        16..=31 => std::thread::yield_now(),
        _ => {
            std::thread::sleep(Duration::from_millis(1));
            return;
        }
    }
    *k += 1;
}

fn check_timeout(started: &mut Option<Instant>, timeout: Duration) -> Result<(), PauseTimeout> {
    let started = *started.get_or_insert_with(Instant::now);
    let waited = started.elapsed();
    if waited >= timeout {
        return Err(PauseTimeout { waited });
    }
    Ok(())
}

/// Spin → pause hint → yield → 1 ms sleeps. The default for real locks.
#[derive(Debug, Default)]
pub struct AdaptivePauser {
    k: u32,
    started: Option<Instant>,
}

impl AdaptivePauser {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Pauser for AdaptivePauser {
    fn reset(&mut self) {
        self.k = 0;
        self.started = None;
    }

    fn pause(&mut self) {
        self.started.get_or_insert_with(Instant::now);
        adaptive_yield(&mut self.k);
    }

    fn pause_with_timeout(&mut self, timeout: Duration) -> Result<(), PauseTimeout> {
        check_timeout(&mut self.started, timeout)?;
        adaptive_yield(&mut self.k);
        Ok(())
    }

    fn time_paused(&self) -> Duration {
        self.started.map(|s| s.elapsed()).unwrap_or_default()
    }
}

/// Never sleeps or yields; only issues a CPU pause hint.
#[derive(Debug, Default)]
pub struct BusyPauser {
    started: Option<Instant>,
}

impl BusyPauser {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Pauser for BusyPauser {
    fn reset(&mut self) {
        self.started = None;
    }

    fn pause(&mut self) {
        self.started.get_or_insert_with(Instant::now);
        std::hint::spin_loop();
    }

    fn pause_with_timeout(&mut self, timeout: Duration) -> Result<(), PauseTimeout> {
        check_timeout(&mut self.started, timeout)?;
        std::hint::spin_loop();
        Ok(())
    }

    fn time_paused(&self) -> Duration {
        self.started.map(|s| s.elapsed()).unwrap_or_default()
    }
}
