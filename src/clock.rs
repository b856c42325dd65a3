// SPDX-License-Identifier: Apache-2.0 OR MIT
// Time source: raw cycle counter plus calibrated wall-clock conversion

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Read the CPU cycle counter with the cheapest instruction the target
/// offers. On targets without one this falls back to the wall clock; the
/// engine detects that at startup and selects wall-clock mode instead
/// (see [`TimestampMode::resolve`](crate::config::TimestampMode::resolve)),
/// so the fallback is never mixed with calibrated conversion.
#[inline(always)]
pub fn raw_cycles() -> u64 {
    #[cfg(target_arch = "x86_64")]
    unsafe {
        std::arch::x86_64::_rdtsc()
    }

    #[cfg(target_arch = "aarch64")]
    unsafe {
        let value: u64;
        std::arch::asm!("mrs {}, cntvct_el0", out(reg) value);
        value
    }

    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    wall_nanos()
}

/// Whether this target has a real cycle counter.
pub const fn cycle_counter_available() -> bool {
    cfg!(any(target_arch = "x86_64", target_arch = "aarch64"))
}

/// Nanoseconds since the Unix epoch from the system clock.
#[inline]
pub fn wall_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Converts raw cycle counts to nanoseconds since the Unix epoch.
///
/// Owned by the backend thread. Calibration measures the cycle rate against
/// the wall clock once at construction and keeps a `(cycles, epoch_nanos)`
/// anchor that is refreshed every `resync_interval`. A refresh never moves
/// the mapping backwards: the new anchor is clamped so a cycle value
/// converted after a resync can not land earlier than the same value
/// converted before it, which keeps the committed stream monotone.
pub struct CycleClock {
    ns_per_cycle: f64,
    anchor_cycles: u64,
    anchor_ns: u64,
    resync_interval: Duration,
    last_resync: Instant,
}

impl CycleClock {
    /// Calibrate against the wall clock. Spins for `CALIBRATION_WINDOW`, so
    /// construction is not free; the backend builds it once at startup.
    pub fn new(resync_interval: Duration) -> Self {
        const CALIBRATION_WINDOW: Duration = Duration::from_millis(10);

        let start_wall = wall_nanos();
        let start_cycles = raw_cycles();
        let started = Instant::now();
        while started.elapsed() < CALIBRATION_WINDOW {
            std::hint::spin_loop();
        }
        let end_cycles = raw_cycles();
        let end_wall = wall_nanos();

        let elapsed_ns = end_wall.saturating_sub(start_wall).max(1);
        let elapsed_cycles = end_cycles.saturating_sub(start_cycles).max(1);
        let ns_per_cycle = elapsed_ns as f64 / elapsed_cycles as f64;

        Self {
            ns_per_cycle,
            anchor_cycles: end_cycles,
            anchor_ns: end_wall,
            resync_interval,
            last_resync: Instant::now(),
        }
    }

    /// Convert a raw cycle count to nanoseconds since the Unix epoch.
    #[inline]
    pub fn to_epoch_nanos(&mut self, cycles: u64) -> u64 {
        self.maybe_resync();
        self.project(cycles)
    }

    fn project(&self, cycles: u64) -> u64 {
        if cycles >= self.anchor_cycles {
            let delta = (cycles - self.anchor_cycles) as f64 * self.ns_per_cycle;
            self.anchor_ns.saturating_add(delta as u64)
        } else {
            let delta = (self.anchor_cycles - cycles) as f64 * self.ns_per_cycle;
            self.anchor_ns.saturating_sub(delta as u64)
        }
    }

    fn maybe_resync(&mut self) {
        if self.last_resync.elapsed() < self.resync_interval {
            return;
        }
        let cycles = raw_cycles();
        let wall = wall_nanos();
        // Clamp: the fresh anchor may not map the current cycle count
        // earlier than the old mapping did, otherwise records committed
        // around the resync would swap order in rendered output.
        let old_projection = self.project(cycles);
        self.anchor_cycles = cycles;
        self.anchor_ns = wall.max(old_projection);
        self.last_resync = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_cycles_advances() {
        let a = raw_cycles();
        std::thread::sleep(Duration::from_millis(1));
        let b = raw_cycles();
        assert!(b > a);
    }

    #[test]
    fn test_conversion_tracks_wall_clock() {
        let mut clock = CycleClock::new(Duration::from_secs(60));
        let cycles = raw_cycles();
        let converted = clock.to_epoch_nanos(cycles);
        let wall = wall_nanos();
        // Within 100ms of the real wall clock right after calibration.
        let skew = wall.abs_diff(converted);
        assert!(skew < 100_000_000, "skew {skew}ns");
    }

    #[test]
    fn test_conversion_is_monotone_per_input() {
        let mut clock = CycleClock::new(Duration::from_secs(60));
        let base = raw_cycles();
        let mut last = 0u64;
        for step in 0..100u64 {
            let ns = clock.to_epoch_nanos(base + step * 1_000);
            assert!(ns >= last);
            last = ns;
        }
    }

    #[test]
    fn test_resync_does_not_reorder() {
        // Resync on every conversion and verify increasing cycle inputs
        // still map to non-decreasing nanoseconds.
        let mut clock = CycleClock::new(Duration::from_nanos(0));
        let mut last = 0u64;
        for _ in 0..50 {
            let ns = clock.to_epoch_nanos(raw_cycles());
            assert!(ns >= last, "resync moved the mapping backwards");
            last = ns;
            std::thread::sleep(Duration::from_micros(100));
        }
    }
}
