//! # Poll Clock
//!
//! Paces the network thread at the configured poll rate.
//!
//! ## Design
//!
//! The network thread does not sleep between ticks. Each tick blocks in the
//! transport's receive until the tick deadline, so the clock only hands out
//! deadlines and measures how long the non-receive work took.

use std::time::{Duration, Instant};

/// Fixed-rate tick clock.
pub(crate) struct TickClock {
    /// Target tick duration.
    tick_duration: Duration,
    /// Total ticks executed.
    tick_count: u64,
    /// Work time statistics.
    stats: TickStats,
}

/// Tick timing statistics.
#[derive(Clone, Copy, Debug, Default)]
pub struct TickStats {
    /// Minimum work duration observed.
    pub min_work_us: u64,
    /// Maximum work duration observed.
    pub max_work_us: u64,
    /// Average work duration (rolling).
    pub avg_work_us: u64,
    /// Ticks whose work alone exceeded the tick budget.
    pub late_ticks: u64,
    /// Total ticks measured.
    pub total_ticks: u64,
}

impl TickClock {
    /// Creates a clock with one tick every `tick_duration`.
    pub(crate) fn new(tick_duration: Duration) -> Self {
        Self {
            tick_duration,
            tick_count: 0,
            stats: TickStats {
                min_work_us: u64::MAX,
                ..TickStats::default()
            },
        }
    }

    /// Starts a tick and returns its receive deadline.
    pub(crate) fn begin_tick(&mut self) -> Instant {
        self.tick_count += 1;
        Instant::now() + self.tick_duration
    }

    /// Records the work done after the receive phase.
    pub(crate) fn end_tick(&mut self, work_start: Instant) {
        let duration = work_start.elapsed();
        let duration_us = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);

        self.stats.total_ticks += 1;
        self.stats.min_work_us = self.stats.min_work_us.min(duration_us);
        self.stats.max_work_us = self.stats.max_work_us.max(duration_us);

        // Rolling average
        self.stats.avg_work_us = (self.stats.avg_work_us * 15 + duration_us) / 16;

        if duration > self.tick_duration {
            self.stats.late_ticks += 1;
        }
    }

    /// Returns the current tick count.
    pub(crate) const fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Returns tick statistics.
    pub(crate) const fn stats(&self) -> &TickStats {
        &self.stats
    }

    /// Returns the target tick duration.
    #[cfg(test)]
    pub(crate) const fn tick_duration(&self) -> Duration {
        self.tick_duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetConfig;

    #[test]
    fn test_clock_from_poll_rate() {
        let config = NetConfig {
            poll_rate: 60,
            ..NetConfig::default()
        };
        let clock = TickClock::new(config.poll_interval());
        assert_eq!(clock.tick_count(), 0);
        assert_eq!(clock.tick_duration(), Duration::from_micros(16666));
    }

    #[test]
    fn test_deadline_is_one_tick_ahead() {
        let mut clock = TickClock::new(Duration::from_millis(50));
        let before = Instant::now();
        let deadline = clock.begin_tick();
        assert!(deadline >= before + Duration::from_millis(50));
        assert!(deadline <= Instant::now() + Duration::from_millis(50));
        assert_eq!(clock.tick_count(), 1);
    }

    #[test]
    fn test_stats_tracking() {
        let mut clock = TickClock::new(Duration::from_micros(100));

        for _ in 0..5 {
            let _ = clock.begin_tick();
            let work = Instant::now();
            std::thread::sleep(Duration::from_micros(200));
            clock.end_tick(work);
        }

        let stats = clock.stats();
        assert_eq!(stats.total_ticks, 5);
        assert!(stats.min_work_us >= 200);
        assert!(stats.min_work_us <= stats.max_work_us);
        assert_eq!(stats.late_ticks, 5);
    }
}
