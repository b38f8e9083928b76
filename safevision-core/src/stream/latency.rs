//! Round-trip latency history for rate adaptation.
//!
//! Keeps the most recent `capacity` latencies (FIFO) and a smoothed RTT.
//! The moving average drives the rate bands; the smoothed RTT only feeds
//! the processing-lag alert.

use std::collections::VecDeque;

/// Bounded latency window, in milliseconds.
#[derive(Debug, Clone)]
pub struct LatencyTracker {
    samples: VecDeque<u64>,
    capacity: usize,
    /// EWMA with α = 1/8, `0.0` until the first sample.
    smoothed_rtt_ms: f64,
}

impl LatencyTracker {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            smoothed_rtt_ms: 0.0,
        }
    }

    /// Push one sample, evicting the oldest past capacity.
    pub fn record(&mut self, latency_ms: u64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(latency_ms);

        let sample = latency_ms as f64;
        if self.smoothed_rtt_ms == 0.0 {
            self.smoothed_rtt_ms = sample;
        } else {
            // srtt = 7/8 * srtt + 1/8 * sample
            self.smoothed_rtt_ms = self.smoothed_rtt_ms * 7.0 / 8.0 + sample / 8.0;
        }
    }

    /// Record `now - sent` (zero if the clocks disagree) and return it.
    pub fn record_between(&mut self, sent_ms: u64, now_ms: u64) -> u64 {
        let latency = now_ms.saturating_sub(sent_ms);
        self.record(latency);
        latency
    }

    /// Mean of the window; `0.0` when empty.
    pub fn moving_average(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<u64>() as f64 / self.samples.len() as f64
    }

    pub fn smoothed_rtt_ms(&self) -> f64 {
        self.smoothed_rtt_ms
    }

    /// `true` if at least `n` samples exist and the newest `n` are all
    /// strictly below `threshold_ms`.
    pub fn recent_all_below(&self, n: usize, threshold_ms: f64) -> bool {
        n > 0
            && self.samples.len() >= n
            && self
                .samples
                .iter()
                .rev()
                .take(n)
                .all(|&s| (s as f64) < threshold_ms)
    }

    pub fn last(&self) -> Option<u64> {
        self.samples.back().copied()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn reset(&mut self) {
        self.samples.clear();
        self.smoothed_rtt_ms = 0.0;
    }
}

impl Default for LatencyTracker {
    fn default() -> Self {
        Self::new(10)
    }
}
