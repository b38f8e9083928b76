//! Settings read at session start and the tuning of the adaptation loop.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::StreamError;
use crate::stream::quality::QualityPolicy;
use crate::stream::rate::RateState;
use crate::stream::types::{Facing, Resolution};

/// Operator-facing stream settings. Applying new settings restarts capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSettings {
    /// Target frames per second at session start.
    pub frame_rate: f64,
    pub min_frame_rate: f64,
    pub max_frame_rate: f64,
    /// Base encode quality in `[0, 1]`.
    pub video_quality: f32,
    pub resolution: Resolution,
    pub facing: Facing,
    /// Latency-driven rate changes and drop penalties.
    pub adaptive_enabled: bool,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            frame_rate: 10.0,
            min_frame_rate: 1.0,
            max_frame_rate: 30.0,
            video_quality: 0.8,
            resolution: Resolution::default(),
            facing: Facing::Front,
            adaptive_enabled: true,
        }
    }
}

impl StreamSettings {
    pub fn validate(&self) -> Result<(), StreamError> {
        if !(0.0..=1.0).contains(&self.video_quality) {
            return Err(StreamError::InvalidConfig(format!(
                "video_quality {} outside [0, 1]",
                self.video_quality
            )));
        }
        if self.resolution.width == 0 || self.resolution.height == 0 {
            return Err(StreamError::InvalidConfig(format!(
                "resolution {} has a zero dimension",
                self.resolution
            )));
        }
        self.rate_state().map(|_| ())
    }

    /// Fresh rate state for a new session; `frame_rate` is clamped into range.
    pub fn rate_state(&self) -> Result<RateState, StreamError> {
        RateState::new(self.frame_rate, self.min_frame_rate, self.max_frame_rate)
    }
}

/// Latency bands, checked in order; the first match adjusts the rate.
#[derive(Debug, Clone, PartialEq)]
pub struct LatencyBands {
    pub severe_above_ms: f64,
    pub severe_step: f64,
    pub high_above_ms: f64,
    pub high_step: f64,
    pub fast_below_ms: f64,
    pub fast_step: f64,
    pub good_below_ms: f64,
    pub good_step: f64,
}

impl Default for LatencyBands {
    fn default() -> Self {
        Self {
            severe_above_ms: 2000.0,
            severe_step: -1.0,
            high_above_ms: 1000.0,
            high_step: -0.5,
            fast_below_ms: 300.0,
            fast_step: 0.5,
            good_below_ms: 500.0,
            good_step: 0.2,
        }
    }
}

impl LatencyBands {
    pub fn validate(&self) -> Result<(), StreamError> {
        let values = [
            self.severe_above_ms,
            self.severe_step,
            self.high_above_ms,
            self.high_step,
            self.fast_below_ms,
            self.fast_step,
            self.good_below_ms,
            self.good_step,
        ];
        if values.iter().all(|v| v.is_finite()) {
            Ok(())
        } else {
            Err(StreamError::InvalidConfig(
                "latency band thresholds and steps must be finite".to_string(),
            ))
        }
    }
}

/// Slow climb back to the base rate after sustained low latency.
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryRule {
    /// Streak length, and the minimum number of samples between firings.
    pub samples: usize,
    pub below_ms: f64,
    pub step: f64,
}

impl Default for RecoveryRule {
    fn default() -> Self {
        Self {
            samples: 5,
            below_ms: 500.0,
            step: 0.3,
        }
    }
}

const MIN_PERIOD: Duration = Duration::from_millis(1);

fn non_negative(v: f64) -> bool {
    v.is_finite() && v >= 0.0
}

/// Tuning of the adaptive streaming loop.
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptationConfig {
    /// Capture poll period, independent of the target rate.
    pub poll_interval: Duration,
    /// Pending count above which an accepted tick is dropped.
    pub drop_threshold: u32,
    /// Rate reduction per hard drop in adaptive mode.
    pub drop_penalty: f64,
    pub window_capacity: usize,
    /// Samples needed before the bands apply.
    pub min_samples: usize,
    pub bands: LatencyBands,
    pub recovery: RecoveryRule,
    pub quality: QualityPolicy,
    /// In-flight time without any result before a stall warning.
    pub stall_timeout: Duration,
    /// Silence before falling back to local display.
    pub failsafe_timeout: Duration,
    /// Keep at most one probe frame in flight while in fallback.
    pub pause_sending_in_fallback: bool,
}

impl Default for AdaptationConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            drop_threshold: 3,
            drop_penalty: 0.5,
            window_capacity: 10,
            min_samples: 3,
            bands: LatencyBands::default(),
            recovery: RecoveryRule::default(),
            quality: QualityPolicy::default(),
            stall_timeout: Duration::from_secs(5),
            failsafe_timeout: Duration::from_secs(10),
            pause_sending_in_fallback: false,
        }
    }
}

impl AdaptationConfig {
    pub fn validate(&self) -> Result<(), StreamError> {
        let invalid = |msg: &str| Err(StreamError::InvalidConfig(msg.to_string()));

        // timers run on a millisecond clock
        if self.poll_interval < MIN_PERIOD {
            return invalid("poll_interval must be at least 1 ms");
        }
        if self.stall_timeout < MIN_PERIOD || self.failsafe_timeout < MIN_PERIOD {
            return invalid("stall and failsafe timeouts must be at least 1 ms");
        }
        if self.window_capacity == 0 || self.min_samples == 0 {
            return invalid("latency window and min_samples must be positive");
        }
        if self.min_samples > self.window_capacity {
            return invalid("min_samples exceeds the latency window");
        }
        if self.recovery.samples == 0 || self.recovery.samples > self.window_capacity {
            return invalid("recovery streak must fit in the latency window");
        }
        if !non_negative(self.drop_penalty) || !non_negative(self.recovery.step) {
            return invalid("drop penalty and recovery step must be finite and non-negative");
        }
        if !self.recovery.below_ms.is_finite() {
            return invalid("recovery threshold must be finite");
        }
        self.bands.validate()
    }

    pub(crate) fn poll_interval_ms(&self) -> u64 {
        self.poll_interval.as_millis() as u64
    }

    pub(crate) fn stall_timeout_ms(&self) -> u64 {
        self.stall_timeout.as_millis() as u64
    }

    pub(crate) fn failsafe_timeout_ms(&self) -> u64 {
        self.failsafe_timeout.as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        StreamSettings::default().validate().unwrap();
        AdaptationConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_inverted_rate_range() {
        let settings = StreamSettings {
            min_frame_rate: 20.0,
            max_frame_rate: 5.0,
            ..Default::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(StreamError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_out_of_range_quality() {
        let settings = StreamSettings {
            video_quality: 1.2,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn rejects_non_finite_tuning() {
        let broken = [
            AdaptationConfig {
                drop_penalty: f64::NAN,
                ..Default::default()
            },
            AdaptationConfig {
                drop_penalty: -0.5,
                ..Default::default()
            },
            AdaptationConfig {
                recovery: RecoveryRule {
                    step: f64::NAN,
                    ..Default::default()
                },
                ..Default::default()
            },
            AdaptationConfig {
                recovery: RecoveryRule {
                    below_ms: f64::INFINITY,
                    ..Default::default()
                },
                ..Default::default()
            },
            AdaptationConfig {
                bands: LatencyBands {
                    severe_step: f64::NAN,
                    ..Default::default()
                },
                ..Default::default()
            },
            AdaptationConfig {
                bands: LatencyBands {
                    good_below_ms: f64::NEG_INFINITY,
                    ..Default::default()
                },
                ..Default::default()
            },
        ];
        for config in broken {
            assert!(
                matches!(config.validate(), Err(StreamError::InvalidConfig(_))),
                "accepted {config:?}"
            );
        }
    }

    #[test]
    fn rejects_sub_millisecond_periods() {
        let poll = AdaptationConfig {
            poll_interval: Duration::from_micros(500),
            ..Default::default()
        };
        assert!(poll.validate().is_err());

        let stall = AdaptationConfig {
            stall_timeout: Duration::from_micros(999),
            ..Default::default()
        };
        assert!(stall.validate().is_err());

        let failsafe = AdaptationConfig {
            failsafe_timeout: Duration::from_nanos(1),
            ..Default::default()
        };
        assert!(failsafe.validate().is_err());

        let one_ms = AdaptationConfig {
            poll_interval: Duration::from_millis(1),
            ..Default::default()
        };
        one_ms.validate().unwrap();
    }

    #[test]
    fn rejects_recovery_longer_than_window() {
        let config = AdaptationConfig {
            window_capacity: 4,
            min_samples: 3,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
