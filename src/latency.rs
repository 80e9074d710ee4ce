use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use crate::protocol::LatencyStats;

const MAX_MEASUREMENTS: usize = 100;

#[derive(Clone, Copy, Debug)]
pub struct LatencyMeasurement {
    pub timestamp: DateTime<Utc>,
    pub latency_ms: f64,
}

/// Bounded ring of round-trip latency samples.
#[derive(Debug, Default)]
pub struct LatencyTracker {
    measurements: VecDeque<LatencyMeasurement>,
}

impl LatencyTracker {
    pub fn new() -> Self {
        Self {
            measurements: VecDeque::with_capacity(MAX_MEASUREMENTS),
        }
    }

    pub fn add_measurement(&mut self, latency_ms: f64) {
        self.measurements.push_back(LatencyMeasurement {
            timestamp: Utc::now(),
            latency_ms,
        });
        while self.measurements.len() > MAX_MEASUREMENTS {
            self.measurements.pop_front();
        }
    }

    /// Arithmetic mean, 0 when no measurements have been recorded.
    pub fn average_latency(&self) -> f64 {
        if self.measurements.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.measurements.iter().map(|m| m.latency_ms).sum();
        round2(sum / self.measurements.len() as f64)
    }

    pub fn stats(&self) -> LatencyStats {
        if self.measurements.is_empty() {
            return LatencyStats::default();
        }
        let min = self
            .measurements
            .iter()
            .map(|m| m.latency_ms)
            .fold(f64::INFINITY, f64::min);
        let max = self
            .measurements
            .iter()
            .map(|m| m.latency_ms)
            .fold(f64::NEG_INFINITY, f64::max);
        LatencyStats {
            avg: self.average_latency(),
            min: round2(min),
            max: round2(max),
            count: self.measurements.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.measurements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn empty_tracker_reports_zeros() {
        let tracker = LatencyTracker::new();
        assert_eq!(tracker.average_latency(), 0.0);
        let stats = tracker.stats();
        assert_eq!(stats.avg, 0.0);
        assert_eq!(stats.min, 0.0);
        assert_eq!(stats.max, 0.0);
        assert_eq!(stats.count, 0);
    }

    #[test]
    fn average_and_bounds() {
        let mut tracker = LatencyTracker::new();
        tracker.add_measurement(10.0);
        tracker.add_measurement(20.0);
        tracker.add_measurement(30.0);

        let stats = tracker.stats();
        assert_relative_eq!(stats.avg, 20.0);
        assert_relative_eq!(stats.min, 10.0);
        assert_relative_eq!(stats.max, 30.0);
        assert_eq!(stats.count, 3);
    }

    #[test]
    fn ring_evicts_oldest_beyond_capacity() {
        let mut tracker = LatencyTracker::new();
        for i in 0..150 {
            tracker.add_measurement(i as f64);
        }
        assert_eq!(tracker.len(), MAX_MEASUREMENTS);
        // Oldest 50 evicted, so min is 50.
        assert_relative_eq!(tracker.stats().min, 50.0);
    }
}
