//! # Fixed-Timestep Tick Loop
//!
//! Drives the outbound publication cadence independently of the render rate.
//!
//! ## Design
//!
//! The accumulator pattern: wall-clock time drains into fixed-size ticks, so
//! a slow frame produces several catch-up ticks instead of a slower
//! simulation.

use std::time::{Duration, Instant};

/// Fixed-timestep tick loop controller.
pub struct TickLoop {
    /// Target tick duration.
    tick_duration: Duration,
    /// Time of last accumulation.
    last_tick: Instant,
    /// Accumulated time not yet consumed by ticks.
    accumulator: Duration,
    /// Total ticks executed.
    tick_count: u64,
    /// Timing statistics.
    stats: TickStats,
}

/// Tick timing statistics.
#[derive(Clone, Copy, Debug, Default)]
pub struct TickStats {
    /// Minimum tick duration observed, in microseconds.
    pub min_tick_us: u64,
    /// Maximum tick duration observed, in microseconds.
    pub max_tick_us: u64,
    /// Rolling average tick duration, in microseconds.
    pub avg_tick_us: u64,
    /// Ticks that overran their budget.
    pub late_ticks: u64,
    /// Total ticks measured.
    pub total_ticks: u64,
}

impl TickLoop {
    /// Creates a new tick loop with the specified rate in Hz.
    #[must_use]
    pub fn new(tick_rate: u32) -> Self {
        let tick_duration = Duration::from_micros(1_000_000 / u64::from(tick_rate.max(1)));

        Self {
            tick_duration,
            last_tick: Instant::now(),
            accumulator: Duration::ZERO,
            tick_count: 0,
            stats: TickStats {
                min_tick_us: u64::MAX,
                ..TickStats::default()
            },
        }
    }

    /// Returns true if it's time to execute a tick.
    ///
    /// Call this in a loop until it returns false.
    #[must_use]
    pub fn should_tick(&mut self) -> bool {
        let now = Instant::now();
        self.accumulator += now.duration_since(self.last_tick);
        self.last_tick = now;

        self.accumulator >= self.tick_duration
    }

    /// Marks the start of a tick, returning its start time.
    #[must_use]
    pub fn begin_tick(&mut self) -> Instant {
        self.accumulator = self.accumulator.saturating_sub(self.tick_duration);
        self.tick_count += 1;
        Instant::now()
    }

    /// Marks the end of a tick and records its duration.
    pub fn end_tick(&mut self, start: Instant) {
        let duration = start.elapsed();
        let duration_us = duration.as_micros() as u64;

        self.stats.total_ticks += 1;
        self.stats.min_tick_us = self.stats.min_tick_us.min(duration_us);
        self.stats.max_tick_us = self.stats.max_tick_us.max(duration_us);
        self.stats.avg_tick_us = (self.stats.avg_tick_us * 15 + duration_us) / 16;

        if duration > self.tick_duration {
            self.stats.late_ticks += 1;
        }
    }

    /// Sleeps until the next tick is due.
    pub fn wait_for_next_tick(&self) {
        let elapsed = Instant::now().duration_since(self.last_tick);
        if elapsed < self.tick_duration {
            std::thread::sleep(self.tick_duration - elapsed);
        }
    }

    /// Returns the current tick count.
    #[must_use]
    pub const fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Returns tick statistics.
    #[must_use]
    pub const fn stats(&self) -> &TickStats {
        &self.stats
    }

    /// Returns the target tick duration.
    #[must_use]
    pub const fn tick_duration(&self) -> Duration {
        self.tick_duration
    }
}

impl Default for TickLoop {
    fn default() -> Self {
        Self::new(crate::DEFAULT_TICK_RATE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_loop_creation() {
        let tick_loop = TickLoop::new(60);
        assert_eq!(tick_loop.tick_count(), 0);
        assert_eq!(tick_loop.tick_duration(), Duration::from_micros(16_666));
    }

    #[test]
    fn test_tick_execution() {
        let mut tick_loop = TickLoop::new(1_000);

        std::thread::sleep(Duration::from_millis(5));

        assert!(tick_loop.should_tick());
        let start = tick_loop.begin_tick();
        tick_loop.end_tick(start);

        assert_eq!(tick_loop.tick_count(), 1);
        assert_eq!(tick_loop.stats().total_ticks, 1);
    }

    #[test]
    fn test_zero_rate_clamped() {
        let tick_loop = TickLoop::new(0);
        assert_eq!(tick_loop.tick_duration(), Duration::from_secs(1));
    }
}
