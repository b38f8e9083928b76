//! Adaptive send rate.
//!
//! Degrades quickly on high latency and recovers slowly: the bands can move
//! the rate every sample, but the climb back to the base rate beyond what
//! the bands give is limited to one step per qualifying streak.

use crate::error::StreamError;
use crate::stream::config::{LatencyBands, RecoveryRule};
use crate::stream::latency::LatencyTracker;

// ── RateState ────────────────────────────────────────────────────

/// Frames per second. `min <= current <= max` always holds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateState {
    current: f64,
    base: f64,
    min: f64,
    max: f64,
}

impl RateState {
    /// `base` is clamped into `[min, max]`; the range itself must be valid.
    pub fn new(base: f64, min: f64, max: f64) -> Result<Self, StreamError> {
        if !min.is_finite() || !max.is_finite() || !base.is_finite() {
            return Err(StreamError::InvalidConfig(
                "frame rates must be finite".to_string(),
            ));
        }
        if min <= 0.0 {
            return Err(StreamError::InvalidConfig(format!(
                "min frame rate {min} must be positive"
            )));
        }
        if min > max {
            return Err(StreamError::InvalidConfig(format!(
                "min frame rate {min} exceeds max {max}"
            )));
        }
        let base = base.clamp(min, max);
        Ok(Self {
            current: base,
            base,
            min,
            max,
        })
    }

    pub fn current(&self) -> f64 {
        self.current
    }

    pub fn base(&self) -> f64 {
        self.base
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }

    pub fn set_current(&mut self, value: f64) {
        self.current = self.clamp(value);
    }

    /// Add `delta` (clamped) and return the new rate.
    pub fn adjust_by(&mut self, delta: f64) -> f64 {
        self.set_current(self.current + delta);
        self.current
    }

    /// `current = min(current + step, base)` when below base.
    pub fn relax_toward_base(&mut self, step: f64) -> bool {
        if self.current >= self.base {
            return false;
        }
        self.set_current((self.current + step).min(self.base));
        true
    }

    /// Minimum spacing between accepted ticks.
    pub fn min_interval_ms(&self) -> f64 {
        1000.0 / self.clamp(self.current)
    }
}

// ── RateController ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatencyBand {
    Severe,
    High,
    Fast,
    Good,
    /// Between the good and high thresholds; no change.
    Steady,
}

/// What one latency sample did to the rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateChange {
    /// `None` until the window has enough samples.
    pub band: Option<LatencyBand>,
    pub recovered: bool,
    pub before: f64,
    pub after: f64,
}

impl RateChange {
    pub fn changed(&self) -> bool {
        self.before != self.after
    }
}

#[derive(Debug, Clone)]
pub struct RateController {
    bands: LatencyBands,
    recovery: RecoveryRule,
    min_samples: usize,
    samples_since_recovery: usize,
}

impl RateController {
    pub fn new(bands: LatencyBands, recovery: RecoveryRule, min_samples: usize) -> Self {
        Self {
            bands,
            recovery,
            min_samples,
            samples_since_recovery: 0,
        }
    }

    pub fn classify(&self, average_ms: f64) -> (LatencyBand, f64) {
        let b = &self.bands;
        if average_ms > b.severe_above_ms {
            (LatencyBand::Severe, b.severe_step)
        } else if average_ms > b.high_above_ms {
            (LatencyBand::High, b.high_step)
        } else if average_ms < b.fast_below_ms {
            (LatencyBand::Fast, b.fast_step)
        } else if average_ms < b.good_below_ms {
            (LatencyBand::Good, b.good_step)
        } else {
            (LatencyBand::Steady, 0.0)
        }
    }

    /// Apply the bands and the recovery rule after a sample was recorded.
    pub fn on_sample(
        &mut self,
        latency: &LatencyTracker,
        rate: &mut RateState,
        pending: u32,
    ) -> RateChange {
        let before = rate.current();
        self.samples_since_recovery += 1;

        let band = if latency.len() >= self.min_samples {
            let (band, step) = self.classify(latency.moving_average());
            rate.adjust_by(step);
            Some(band)
        } else {
            None
        };

        let mut recovered = false;
        if pending == 0
            && self.samples_since_recovery >= self.recovery.samples
            && latency.recent_all_below(self.recovery.samples, self.recovery.below_ms)
            && rate.relax_toward_base(self.recovery.step)
        {
            self.samples_since_recovery = 0;
            recovered = true;
        }

        RateChange {
            band,
            recovered,
            before,
            after: rate.current(),
        }
    }

    /// Hard-drop penalty.
    pub fn penalize(&self, rate: &mut RateState, penalty: f64) -> f64 {
        rate.adjust_by(-penalty)
    }

    pub fn reset_streak(&mut self) {
        self.samples_since_recovery = 0;
    }
}
