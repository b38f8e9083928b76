//! Capture pacing.
//!
//! The poll timer runs at a fixed period; a tick is accepted only once
//! `1000 / rate` milliseconds have passed since the last accepted tick.

use crate::stream::rate::RateState;

#[derive(Debug, Clone, Default)]
pub struct CaptureLoop {
    running: bool,
    last_accepted: Option<u64>,
    accepted: u64,
}

impl CaptureLoop {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next tick is accepted regardless of the rate.
    pub fn start(&mut self) {
        self.running = true;
        self.last_accepted = None;
    }

    /// Idempotent. Returns `true` if the loop was running.
    pub fn stop(&mut self) -> bool {
        let was_running = self.running;
        self.running = false;
        self.last_accepted = None;
        was_running
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Ticks accepted since construction.
    pub fn accepted(&self) -> u64 {
        self.accepted
    }

    /// `true` if the tick at `now` is accepted. Acceptance is recorded even
    /// if the frame is later dropped.
    pub fn poll(&mut self, now: u64, rate: &RateState) -> bool {
        if !self.running {
            return false;
        }
        if let Some(last) = self.last_accepted {
            let elapsed = now.saturating_sub(last) as f64;
            if elapsed < rate.min_interval_ms() {
                return false;
            }
        }
        self.last_accepted = Some(now);
        self.accepted += 1;
        true
    }
}
