//! Monotonic time sources and media time conversions
//!
//! All engine timing runs on a single monotonic nanosecond timeline supplied
//! by a [`MonotonicClock`]. Production code uses [`SystemClock`]; tests and
//! the simulator use [`ManualClock`] so that every timing decision is
//! reproducible.
//!
//! Media timestamps are carried as signed microseconds (`i64`), device clock
//! readings as signed nanoseconds, matching what decoders and audio devices
//! report.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

/// Microseconds per second
pub const MICROS_PER_SECOND: i64 = 1_000_000;

/// Nanoseconds per microsecond
pub const NANOS_PER_MICRO: i64 = 1_000;

/// Source of monotonic time in nanoseconds.
///
/// The origin is arbitrary but fixed for the lifetime of the clock; only
/// differences between readings are meaningful.
pub trait MonotonicClock: Send + Sync {
    /// Current reading in nanoseconds.
    fn now_ns(&self) -> i64;

    /// Current reading in microseconds.
    fn now_us(&self) -> i64 {
        self.now_ns() / NANOS_PER_MICRO
    }
}

/// Wall clock backed by [`Instant`], anchored at construction.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
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

impl MonotonicClock for SystemClock {
    fn now_ns(&self) -> i64 {
        // i64 nanoseconds covers ~292 years of uptime
        self.origin.elapsed().as_nanos() as i64
    }
}

/// Clock that only moves when told to.
///
/// Shared between the engine and the simulated collaborators so they observe
/// the same timeline.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ns: AtomicI64,
}

impl ManualClock {
    /// Create a clock reading `start_ns`.
    pub fn new(start_ns: i64) -> Self {
        Self {
            now_ns: AtomicI64::new(start_ns),
        }
    }

    /// Move the clock forward by `delta_us` microseconds.
    pub fn advance_us(&self, delta_us: i64) {
        self.now_ns
            .fetch_add(delta_us * NANOS_PER_MICRO, Ordering::SeqCst);
    }

    /// Move the clock forward by `delta_ms` milliseconds.
    pub fn advance_ms(&self, delta_ms: i64) {
        self.advance_us(delta_ms * 1_000);
    }

    /// Jump to an absolute reading. Moving backwards is ignored.
    pub fn set_ns(&self, now_ns: i64) {
        self.now_ns.fetch_max(now_ns, Ordering::SeqCst);
    }
}

impl MonotonicClock for ManualClock {
    fn now_ns(&self) -> i64 {
        self.now_ns.load(Ordering::SeqCst)
    }
}

/// Convert audio frames to microseconds at `sample_rate`.
pub fn frames_to_us(frames: i64, sample_rate: u32) -> i64 {
    if sample_rate == 0 {
        return 0;
    }
    frames * MICROS_PER_SECOND / sample_rate as i64
}

/// Convert microseconds to whole audio frames at `sample_rate` (truncating).
pub fn us_to_frames(us: i64, sample_rate: u32) -> i64 {
    us * sample_rate as i64 / MICROS_PER_SECOND
}

/// Convert microseconds to nanoseconds.
pub fn us_to_ns(us: i64) -> i64 {
    us * NANOS_PER_MICRO
}

/// Convert nanoseconds to microseconds (truncating).
pub fn ns_to_us(ns: i64) -> i64 {
    ns / NANOS_PER_MICRO
}

/// Round microseconds to the nearest millisecond.
pub fn us_to_ms_rounded(us: i64) -> i64 {
    (us + 500) / 1_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let first = clock.now_ns();
        let second = clock.now_ns();
        assert!(second >= first);
    }

    #[test]
    fn test_manual_clock_advances_only_when_told() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.now_ns(), 1_000);

        clock.advance_us(5);
        assert_eq!(clock.now_ns(), 6_000);

        clock.advance_ms(1);
        assert_eq!(clock.now_us(), 1_006);
    }

    #[test]
    fn test_manual_clock_ignores_backwards_jump() {
        let clock = ManualClock::new(10_000);
        clock.set_ns(5_000);
        assert_eq!(clock.now_ns(), 10_000);

        clock.set_ns(20_000);
        assert_eq!(clock.now_ns(), 20_000);
    }

    #[test]
    fn test_frame_conversions() {
        assert_eq!(frames_to_us(44_100, 44_100), 1_000_000);
        assert_eq!(frames_to_us(22_050, 44_100), 500_000);
        assert_eq!(us_to_frames(1_000_000, 48_000), 48_000);
        assert_eq!(us_to_frames(20_000, 44_100), 882);
    }

    #[test]
    fn test_frames_to_us_zero_rate() {
        assert_eq!(frames_to_us(1_000, 0), 0);
    }

    #[test]
    fn test_unit_conversions() {
        assert_eq!(us_to_ns(1_500), 1_500_000);
        assert_eq!(ns_to_us(1_500_999), 1_500);
        assert_eq!(us_to_ms_rounded(1_499), 1);
        assert_eq!(us_to_ms_rounded(1_500), 2);
        assert_eq!(us_to_ms_rounded(0), 0);
    }
}
