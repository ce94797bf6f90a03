//! Clock sources for the scheduler.
//!
//! The engine schedules against an absolute time base in seconds. Which
//! hardware that time base tracks is a backend concern:
//!
//! - [`SystemClock`] - Monotonic wall-clock time (no audio hardware)
//! - [`ManualClock`] - Externally advanced time for offline use and tests
//!
//! The native click backend provides a third implementation driven by the
//! audio stream's sample counter, so trigger times and `now()` drift
//! together with the hardware.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// A monotonically advancing time source in seconds.
pub trait AudioClock: Send {
    /// Current time in seconds since the clock's origin.
    fn now(&self) -> f64;
}

/// Clock backed by [`Instant`], starting at zero when created.
#[derive(Clone, Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Create a clock whose time zero is now.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioClock for SystemClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Externally advanced clock for offline scheduling and tests.
///
/// Clones share the same time cell, so a test can hold one clone and hand
/// another to the conductor.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    micros: Arc<AtomicU64>,
}

impl ManualClock {
    /// Create a manual clock at time zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the absolute time in seconds.
    pub fn set(&self, seconds: f64) {
        let micros = (seconds.max(0.0) * 1_000_000.0).round() as u64;
        self.micros.store(micros, Ordering::Release);
    }

    /// Advance the clock by `seconds`.
    pub fn advance(&self, seconds: f64) {
        let delta = (seconds.max(0.0) * 1_000_000.0).round() as u64;
        self.micros.fetch_add(delta, Ordering::AcqRel);
    }
}

impl AudioClock for ManualClock {
    fn now(&self) -> f64 {
        self.micros.load(Ordering::Acquire) as f64 / 1_000_000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_advances() {
        let clock = SystemClock::new();
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
    }

    #[test]
    fn test_manual_clock_shared_between_clones() {
        let clock = ManualClock::new();
        let view = clock.clone();
        clock.set(1.5);
        assert!((view.now() - 1.5).abs() < 1e-9);
        view.advance(0.25);
        assert!((clock.now() - 1.75).abs() < 1e-9);
    }
}
