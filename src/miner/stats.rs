//! Hashrate tracking for local sealing

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Window the engine reports its hashrate over.
pub const HASHRATE_WINDOW: Duration = Duration::from_secs(60);

/// Rolling window for hashrate calculation
#[derive(Debug)]
pub struct HashrateTracker {
    samples: VecDeque<(Instant, u64)>,
    window: Duration,
    total_hashes: u64,
}

impl Default for HashrateTracker {
    fn default() -> Self {
        Self::new(HASHRATE_WINDOW)
    }
}

impl HashrateTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            samples: VecDeque::with_capacity(120),
            window,
            total_hashes: 0,
        }
    }

    /// Record hashes computed
    pub fn record(&mut self, hashes: u64) {
        self.record_at(Instant::now(), hashes);
    }

    pub fn record_at(&mut self, now: Instant, hashes: u64) {
        self.total_hashes = self.total_hashes.saturating_add(hashes);
        self.samples.push_back((now, hashes));
        self.prune(now);
    }

    fn prune(&mut self, now: Instant) {
        let Some(cutoff) = now.checked_sub(self.window) else {
            return;
        };
        while let Some(&(ts, _)) = self.samples.front() {
            if ts < cutoff {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Current hashrate (hashes per second)
    pub fn hashrate(&self) -> f64 {
        self.hashrate_at(Instant::now())
    }

    /// Hashes in the window ending at `now`, divided by the time they span.
    pub fn hashrate_at(&self, now: Instant) -> f64 {
        let cutoff = now.checked_sub(self.window);
        let mut first = None;
        let mut total = 0u64;
        for &(ts, hashes) in &self.samples {
            if cutoff.map_or(false, |c| ts < c) || ts > now {
                continue;
            }
            first.get_or_insert(ts);
            total = total.saturating_add(hashes);
        }
        let Some(first) = first else {
            return 0.0;
        };
        let elapsed = now.duration_since(first).as_secs_f64();
        if elapsed < 0.001 {
            return 0.0;
        }
        total as f64 / elapsed
    }

    /// Total hashes computed lifetime
    pub fn total_hashes(&self) -> u64 {
        self.total_hashes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hashrate_tracker() {
        let mut tracker = HashrateTracker::default();

        tracker.record(1000);
        std::thread::sleep(Duration::from_millis(100));
        tracker.record(1000);

        let rate = tracker.hashrate();
        assert!(rate > 0.0);
        assert_eq!(tracker.total_hashes(), 2000);
    }

    #[test]
    fn test_hashrate_window() {
        let start = Instant::now();
        let mut tracker = HashrateTracker::new(Duration::from_secs(10));

        tracker.record_at(start, 500);
        tracker.record_at(start + Duration::from_secs(5), 500);
        let rate = tracker.hashrate_at(start + Duration::from_secs(10));
        assert!((rate - 100.0).abs() < 1e-9, "rate was {}", rate);

        // Once the samples age out the rate drops to zero.
        assert_eq!(tracker.hashrate_at(start + Duration::from_secs(30)), 0.0);
        assert_eq!(tracker.total_hashes(), 1000);
    }

    #[test]
    fn test_empty_tracker() {
        assert_eq!(HashrateTracker::default().hashrate(), 0.0);
    }
}
