use serde::Serialize;

use crate::stream::types::{DisplaySource, FailsafeState};

/// Smoothed RTT above which processing lag is reported.
pub const PROCESSING_LAG_WARNING_MS: f64 = 2000.0;
pub const PROCESSING_LAG_CRITICAL_MS: f64 = 5000.0;

/// Snapshot of the stream, published after every transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamStats {
    pub session_active: bool,
    pub connected: bool,
    pub visible: bool,
    pub current_rate: f64,
    pub base_rate: f64,
    pub pending: u32,
    pub dropped: u64,
    pub avg_latency_ms: f64,
    pub smoothed_rtt_ms: f64,
    pub frames_sent: u64,
    pub results_received: u64,
    pub invalid_results: u64,
    pub send_failures: u64,
    pub last_quality: f32,
    pub failsafe: FailsafeState,
    pub display: DisplaySource,
    pub suspicion: u8,
    pub recording: bool,
}

impl Default for StreamStats {
    fn default() -> Self {
        Self {
            session_active: false,
            connected: false,
            visible: true,
            current_rate: 0.0,
            base_rate: 0.0,
            pending: 0,
            dropped: 0,
            avg_latency_ms: 0.0,
            smoothed_rtt_ms: 0.0,
            frames_sent: 0,
            results_received: 0,
            invalid_results: 0,
            send_failures: 0,
            last_quality: 0.0,
            failsafe: FailsafeState::Normal,
            display: DisplaySource::LocalPassthrough,
            suspicion: 0,
            recording: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum LagLevel {
    Normal,
    Warning,
    Critical,
}

impl StreamStats {
    pub fn processing_lag(&self) -> LagLevel {
        if self.smoothed_rtt_ms > PROCESSING_LAG_CRITICAL_MS {
            LagLevel::Critical
        } else if self.smoothed_rtt_ms > PROCESSING_LAG_WARNING_MS {
            LagLevel::Warning
        } else {
            LagLevel::Normal
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lag_levels() {
        let mut stats = StreamStats::default();
        assert_eq!(stats.processing_lag(), LagLevel::Normal);
        stats.smoothed_rtt_ms = 2_500.0;
        assert_eq!(stats.processing_lag(), LagLevel::Warning);
        stats.smoothed_rtt_ms = 6_000.0;
        assert_eq!(stats.processing_lag(), LagLevel::Critical);
    }

    #[test]
    fn serializes_to_json() {
        let json = serde_json::to_value(StreamStats::default()).unwrap();
        assert_eq!(json["failsafe"], "Normal");
        assert_eq!(json["pending"], 0);
    }
}
