//! Sliding-window rate tracking
//!
//! `RateTracker` accumulates samples into one-second windows and reports the
//! average per second over the completed windows. It is used per client for
//! frames/sec and bytes/sec.
//!
//! ```text
//!   window slots (window = 2):  [ done ][ done ][ current ]
//!                                 \______/
//!                       average = sum(done) / completed
//! ```

use std::time::{Duration, Instant};

/// Default number of completed one-second windows to average over
pub const DEFAULT_WINDOW: usize = 1;

/// Fixed-window moving average accumulator
#[derive(Debug, Clone)]
pub struct RateTracker {
    /// Sum of every sample ever recorded
    total: u64,
    /// Average over completed windows (0 until two windows were observed)
    average: u64,
    /// Ring of `window + 1` per-second sums; `slots[current]` is in progress
    slots: Vec<u64>,
    current: usize,
    /// Number of windows observed so far, saturating at `slots.len()`
    observed: usize,
    /// Second index (relative to `epoch`) of the last update
    last_second: Option<u64>,
    epoch: Instant,
}

impl RateTracker {
    /// Create a tracker with the default window
    pub fn new() -> Self {
        Self::with_window(DEFAULT_WINDOW)
    }

    /// Create a tracker averaging over `window` completed seconds
    pub fn with_window(window: usize) -> Self {
        Self::with_epoch(window, Instant::now())
    }

    /// Create a tracker whose second boundaries are aligned to `epoch`
    pub fn with_epoch(window: usize, epoch: Instant) -> Self {
        Self {
            total: 0,
            average: 0,
            slots: vec![0; window.max(1) + 1],
            current: 0,
            observed: 0,
            last_second: None,
            epoch,
        }
    }

    /// Record `value` now and return the updated average
    pub fn add(&mut self, value: u64) -> u64 {
        self.add_at(value, Instant::now())
    }

    /// Record `value` at `now` and return the updated average
    pub fn add_at(&mut self, value: u64, now: Instant) -> u64 {
        let second = now
            .checked_duration_since(self.epoch)
            .unwrap_or(Duration::ZERO)
            .as_secs();

        let advance = match self.last_second {
            None => 1,
            // Clock went backwards: start a fresh window
            Some(last) if second < last => 1,
            Some(last) => second - last,
        };

        if advance > 0 {
            let steps = advance.min(self.slots.len() as u64) as usize;
            for _ in 0..steps {
                self.current = (self.current + 1) % self.slots.len();
                self.slots[self.current] = 0;
                if self.observed < self.slots.len() {
                    self.observed += 1;
                }
            }
            self.last_second = Some(second);
        }

        self.slots[self.current] += value;
        self.total += value;
        self.recalculate();
        self.average
    }

    fn recalculate(&mut self) {
        self.average = 0;
        if self.observed > 1 {
            let completed: u64 = self
                .slots
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != self.current)
                .map(|(_, v)| *v)
                .sum();
            self.average = completed / (self.observed as u64 - 1);
        }
    }

    /// Average per second over completed windows
    pub fn average(&self) -> u64 {
        self.average
    }

    /// Sum of all samples ever recorded
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Sum of the window currently in progress
    pub fn current_window_sum(&self) -> u64 {
        self.slots[self.current]
    }
}

impl Default for RateTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(epoch: Instant, millis: u64) -> Instant {
        epoch + Duration::from_millis(millis)
    }

    #[test]
    fn test_same_window_accumulates() {
        let epoch = Instant::now();
        let mut rate = RateTracker::with_epoch(1, epoch);

        for i in 0..5 {
            rate.add_at(1, at(epoch, 100 + i * 10));
        }

        assert_eq!(rate.total(), 5);
        assert_eq!(rate.current_window_sum(), 5);
        // Only the in-progress window exists
        assert_eq!(rate.average(), 0);
    }

    #[test]
    fn test_average_reflects_completed_window() {
        let epoch = Instant::now();
        let mut rate = RateTracker::with_epoch(1, epoch);

        for _ in 0..5 {
            rate.add_at(1, at(epoch, 200));
        }
        let avg = rate.add_at(1, at(epoch, 1200));

        assert_eq!(avg, 5);
        assert_eq!(rate.average(), 5);
        assert_eq!(rate.current_window_sum(), 1);
        assert_eq!(rate.total(), 6);
    }

    #[test]
    fn test_in_progress_window_not_counted() {
        let epoch = Instant::now();
        let mut rate = RateTracker::with_epoch(1, epoch);

        rate.add_at(3, at(epoch, 0));
        rate.add_at(10, at(epoch, 1000));
        rate.add_at(10, at(epoch, 1500));

        assert_eq!(rate.average(), 3);
        assert_eq!(rate.current_window_sum(), 20);
    }

    #[test]
    fn test_gap_clears_skipped_windows() {
        let epoch = Instant::now();
        let mut rate = RateTracker::with_epoch(1, epoch);

        rate.add_at(100, at(epoch, 0));
        rate.add_at(1, at(epoch, 5000));

        // The 100 is several seconds old and no longer part of the average
        assert_eq!(rate.average(), 0);
        assert_eq!(rate.total(), 101);
    }

    #[test]
    fn test_wider_window_divides_by_completed_count() {
        let epoch = Instant::now();
        let mut rate = RateTracker::with_epoch(3, epoch);

        rate.add_at(4, at(epoch, 0));
        rate.add_at(8, at(epoch, 1000));
        rate.add_at(6, at(epoch, 2000));
        rate.add_at(1, at(epoch, 3000));

        // Completed windows: 4, 8, 6
        assert_eq!(rate.average(), 6);
    }

    #[test]
    fn test_total_is_monotonic() {
        let epoch = Instant::now();
        let mut rate = RateTracker::with_epoch(1, epoch);
        let mut last = 0;

        for s in 0..10u64 {
            rate.add_at(s, at(epoch, s * 700));
            assert!(rate.total() >= last);
            last = rate.total();
        }
        assert_eq!(last, 45);
    }
}
