//! Cycle sources for scope timing.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Source of cycle counts and wall time.
///
/// Cycle counts are 32-bit and wrap; consumers only ever subtract two
/// readings taken on the same thread.
pub trait CycleClock: Send + Sync {
    /// Current cycle count.
    fn cycles(&self) -> u32;

    /// Length of one cycle in seconds.
    fn seconds_per_cycle(&self) -> f64;

    /// Current wall time in seconds from an arbitrary origin.
    fn seconds(&self) -> f64;
}

/// Monotonic clock with nanosecond cycles.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemClock {
    /// Create a clock whose origin is now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl CycleClock for SystemClock {
    #[inline]
    fn cycles(&self) -> u32 {
        // Truncation is intended: deltas are computed with wrapping_sub.
        self.origin.elapsed().as_nanos() as u32
    }

    fn seconds_per_cycle(&self) -> f64 {
        1e-9
    }

    fn seconds(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Clock advanced by hand. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    cycles: Arc<AtomicU32>,
    seconds_bits: Arc<AtomicU64>,
}

impl ManualClock {
    /// Create a clock at cycle 0 and time 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the cycle counter forward.
    pub fn advance(&self, cycles: u32) {
        self.cycles.fetch_add(cycles, Ordering::SeqCst);
    }

    /// Set the wall time returned by [`CycleClock::seconds`].
    pub fn set_seconds(&self, seconds: f64) {
        self.seconds_bits
            .store(seconds.to_bits(), Ordering::SeqCst);
    }

    /// Move the wall time forward.
    pub fn advance_seconds(&self, seconds: f64) {
        let now = f64::from_bits(self.seconds_bits.load(Ordering::SeqCst));
        self.set_seconds(now + seconds);
    }
}

impl CycleClock for ManualClock {
    fn cycles(&self) -> u32 {
        self.cycles.load(Ordering::SeqCst)
    }

    fn seconds_per_cycle(&self) -> f64 {
        1e-6
    }

    fn seconds(&self) -> f64 {
        f64::from_bits(self.seconds_bits.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_is_shared_between_clones() {
        let clock = ManualClock::new();
        let other = clock.clone();
        clock.advance(250);
        other.advance(50);
        assert_eq!(clock.cycles(), 300);
        clock.advance_seconds(1.5);
        assert!((other.seconds() - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn system_clock_moves_forward() {
        let clock = SystemClock::new();
        let start = clock.cycles();
        std::thread::sleep(std::time::Duration::from_millis(1));
        assert!(clock.cycles().wrapping_sub(start) > 0);
    }
}
