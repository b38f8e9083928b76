//! The streaming state machine.
//!
//! [`StreamController`] owns every piece of stream state: the capture
//! session, pacing, pending accounting, the latency window, the adaptive
//! rate, the failsafe and all deadlines. It has no interior mutability and
//! never reads a clock; every method takes `now` in milliseconds. A single
//! driver (the `StreamService`) calls it, which makes each transition atomic
//! with respect to the others.

use tracing::{debug, info, trace, warn};

use crate::error::StreamError;
use crate::protocol::{AnalysisResult, ProcessedFrame};
use crate::stream::capture::CaptureLoop;
use crate::stream::config::{AdaptationConfig, StreamSettings};
use crate::stream::failsafe::{FailsafeMonitor, FailsafeTransition};
use crate::stream::gate::{GateDecision, PendingFrames, TransmissionGate};
use crate::stream::latency::LatencyTracker;
use crate::stream::quality::dynamic_quality;
use crate::stream::rate::{RateChange, RateController, RateState};
use crate::stream::stats::StreamStats;
use crate::stream::suspicion::SuspicionMeter;
use crate::stream::timer::{Deadline, earliest};
use crate::stream::types::{CaptureSession, DisplaySource, Facing, FailsafeState};

// ── Outcomes ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Pending count above the drop threshold.
    OverThreshold,
    /// Another frame is already waiting on the processor.
    InFlight,
    /// Fallback with sending paused; one probe frame is already out.
    FallbackProbe,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickOutcome {
    /// Not capturing, or too soon for the current rate.
    Idle,
    /// Grab a frame at `quality` and send it with these identifiers.
    Send {
        sequence_id: u64,
        sent_timestamp: u64,
        quality: f32,
    },
    Dropped { reason: DropReason, pending: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResultOutcome {
    Accepted {
        latency_ms: u64,
        rate: Option<RateChange>,
        recovered: bool,
    },
    /// Released a pending slot; nothing else.
    Invalid { reason: String },
    /// No session; the result was discarded.
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerEvent {
    /// A frame has been in flight for the stall timeout with no result.
    StallWarning { pending: u32 },
    FailsafeEngaged { silent_ms: u64 },
    /// Results never arrived for these frames; they no longer count as pending.
    InFlightExpired { frames: u32 },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct SessionCounters {
    frames_sent: u64,
    results_received: u64,
    invalid_results: u64,
    send_failures: u64,
}

// ── StreamController ─────────────────────────────────────────────

#[derive(Debug)]
pub struct StreamController {
    settings: StreamSettings,
    config: AdaptationConfig,
    session: Option<CaptureSession>,
    visible: bool,
    connected: bool,

    rate: RateState,
    rate_ctl: RateController,
    latency: LatencyTracker,
    gate: TransmissionGate,
    pending: PendingFrames,
    capture: CaptureLoop,
    failsafe: FailsafeMonitor,

    capture_tick: Deadline,
    stall: Deadline,
    in_flight_expiry: Deadline,

    next_sequence: u64,
    dropped: u64,
    last_quality: f32,
    counters: SessionCounters,
    suspicion: SuspicionMeter,
}

impl StreamController {
    /// Validate `settings` and `config`. The controller starts stopped and
    /// disconnected.
    pub fn new(settings: StreamSettings, config: AdaptationConfig) -> Result<Self, StreamError> {
        settings.validate()?;
        config.validate()?;
        let rate = settings.rate_state()?;

        Ok(Self {
            rate_ctl: RateController::new(
                config.bands.clone(),
                config.recovery.clone(),
                config.min_samples,
            ),
            latency: LatencyTracker::new(config.window_capacity),
            gate: TransmissionGate::new(config.drop_threshold),
            failsafe: FailsafeMonitor::new(config.failsafe_timeout_ms()),
            last_quality: settings.video_quality,
            settings,
            config,
            session: None,
            visible: true,
            connected: false,
            rate,
            pending: PendingFrames::default(),
            capture: CaptureLoop::new(),
            capture_tick: Deadline::idle(),
            stall: Deadline::idle(),
            in_flight_expiry: Deadline::idle(),
            next_sequence: 0,
            dropped: 0,
            counters: SessionCounters::default(),
            suspicion: SuspicionMeter::default(),
        })
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Begin a capture session with the current settings, restarting any
    /// session already running.
    pub fn start(&mut self, now: u64) -> CaptureSession {
        if self.session.is_some() {
            self.stop();
        }

        let session = CaptureSession {
            facing: self.settings.facing,
            resolution: self.settings.resolution,
            started_at_ms: now,
        };
        self.session = Some(session);

        // validated in new() / apply_settings()
        if let Ok(rate) = self.settings.rate_state() {
            self.rate = rate;
        }
        self.latency.reset();
        self.rate_ctl.reset_streak();
        self.pending.clear();
        self.dropped = 0;
        self.counters = SessionCounters::default();
        self.last_quality = self.settings.video_quality;

        self.resume_capture(now);
        info!(
            facing = %session.facing,
            resolution = %session.resolution,
            rate = self.rate.current(),
            connected = self.connected,
            "capture session started"
        );
        session
    }

    /// End the session. Idempotent; returns `true` if a session was running.
    pub fn stop(&mut self) -> bool {
        self.capture.stop();
        self.cancel_timers();
        self.failsafe.reset();
        self.pending.clear();
        match self.session.take() {
            Some(session) => {
                info!(facing = %session.facing, sent = self.counters.frames_sent, "capture session stopped");
                true
            }
            None => false,
        }
    }

    /// Replace the settings; a running session restarts with them.
    pub fn apply_settings(&mut self, settings: StreamSettings, now: u64) -> Result<(), StreamError> {
        settings.validate()?;
        self.settings = settings;
        if self.session.is_some() {
            self.start(now);
        }
        Ok(())
    }

    /// Flip the camera; a running session restarts on the other one.
    pub fn switch_facing(&mut self, now: u64) -> Facing {
        self.settings.facing = self.settings.facing.flipped();
        if self.session.is_some() {
            self.start(now);
        }
        self.settings.facing
    }

    /// Hidden: pause capture and cancel every timer. Visible: resume.
    pub fn set_visible(&mut self, visible: bool, now: u64) {
        if self.visible == visible {
            return;
        }
        self.visible = visible;
        if visible {
            debug!("visible again, resuming capture");
            self.resume_capture(now);
        } else {
            debug!("hidden, pausing capture");
            self.capture.stop();
            self.cancel_timers();
        }
    }

    // ── Connection ───────────────────────────────────────────────

    /// Link lost: pause capture, forget pending work and the latency history.
    pub fn on_disconnect(&mut self) {
        if !self.connected {
            return;
        }
        self.connected = false;
        let written_off = self.pending.clear();
        self.dropped = 0;
        self.latency.reset();
        self.rate_ctl.reset_streak();
        self.capture.stop();
        self.cancel_timers();
        info!(written_off, "transport disconnected, capture paused");
    }

    /// Link (re)established: resume capture and rearm the failsafe from `now`.
    pub fn on_reconnect(&mut self, now: u64) {
        if self.connected {
            return;
        }
        self.connected = true;
        self.resume_capture(now);
        info!(session = self.session.is_some(), "transport connected");
    }

    // ── Ticks ────────────────────────────────────────────────────

    /// `true` when the capture poll deadline has passed.
    pub fn tick_due(&self, now: u64) -> bool {
        self.capture_tick.is_due(now)
    }

    /// One poll of the capture loop.
    pub fn on_tick(&mut self, now: u64) -> TickOutcome {
        if self.session.is_none() || !self.visible || !self.connected {
            self.capture_tick.cancel();
            return TickOutcome::Idle;
        }
        self.schedule_next_tick(now);

        if !self.capture.poll(now, &self.rate) {
            return TickOutcome::Idle;
        }

        let probe_only = self.config.pause_sending_in_fallback && self.failsafe.is_fallback();
        match self.gate.decide(self.pending, probe_only) {
            GateDecision::Drop => {
                self.dropped += 1;
                if self.settings.adaptive_enabled {
                    let rate = self.rate_ctl.penalize(&mut self.rate, self.config.drop_penalty);
                    debug!(pending = self.pending.count(), rate, "frame dropped, rate penalized");
                }
                TickOutcome::Dropped {
                    reason: DropReason::OverThreshold,
                    pending: self.pending.count(),
                }
            }
            GateDecision::SoftDrop => {
                self.dropped += 1;
                let reason = if probe_only && self.pending.count() <= 1 {
                    DropReason::FallbackProbe
                } else {
                    DropReason::InFlight
                };
                trace!(pending = self.pending.count(), ?reason, "frame skipped");
                TickOutcome::Dropped {
                    reason,
                    pending: self.pending.count(),
                }
            }
            GateDecision::Send => {
                self.pending.increment();
                let quality = dynamic_quality(
                    self.settings.video_quality,
                    self.pending.count(),
                    self.latency.moving_average(),
                    &self.config.quality,
                );
                let sequence_id = self.next_sequence;
                self.next_sequence += 1;
                self.last_quality = quality;
                self.counters.frames_sent += 1;

                self.stall.arm_if_idle(now, self.config.stall_timeout_ms());
                self.in_flight_expiry
                    .arm_if_idle(now, self.config.failsafe_timeout_ms());

                trace!(sequence_id, quality, pending = self.pending.count(), "frame accepted");
                TickOutcome::Send {
                    sequence_id,
                    sent_timestamp: now,
                    quality,
                }
            }
        }
    }

    // ── Results ──────────────────────────────────────────────────

    pub fn on_result(&mut self, frame: &ProcessedFrame, now: u64) -> ResultOutcome {
        if self.session.is_none() {
            return ResultOutcome::Ignored;
        }
        if frame.is_empty() {
            return self.on_invalid_result("empty processed frame", now);
        }

        if !self.pending.decrement() {
            debug!(sequence_id = ?frame.sequence_id, "result with nothing pending");
        }
        self.settle_in_flight(now);

        let latency_ms = self.latency.record_between(frame.echoed_timestamp, now);
        self.counters.results_received += 1;

        let rate = if self.settings.adaptive_enabled {
            let change = self
                .rate_ctl
                .on_sample(&self.latency, &mut self.rate, self.pending.count());
            if change.changed() {
                debug!(
                    before = change.before,
                    after = change.after,
                    band = ?change.band,
                    recovered = change.recovered,
                    avg_ms = self.latency.moving_average(),
                    "rate adjusted"
                );
            }
            Some(change)
        } else {
            None
        };

        let recovered = matches!(
            self.failsafe.on_success(now),
            Some(FailsafeTransition::Recovered { .. })
        );
        // paused: resume_capture rearms
        if !self.capture.is_running() {
            self.failsafe.cancel();
        }

        ResultOutcome::Accepted {
            latency_ms,
            rate,
            recovered,
        }
    }

    /// A result that answers a frame but carries nothing usable.
    pub fn on_invalid_result(&mut self, reason: &str, now: u64) -> ResultOutcome {
        if self.session.is_none() {
            return ResultOutcome::Ignored;
        }
        warn!(reason, pending = self.pending.count(), "invalid result");
        self.pending.decrement();
        self.settle_in_flight(now);
        self.counters.invalid_results += 1;
        ResultOutcome::Invalid {
            reason: reason.to_string(),
        }
    }

    /// The transport refused a frame that `on_tick` accepted.
    pub fn on_send_failed(&mut self, now: u64) {
        self.pending.decrement();
        self.counters.send_failures += 1;
        if !self.pending.in_flight() {
            self.stall.cancel();
            self.in_flight_expiry.cancel();
        } else {
            self.in_flight_expiry
                .arm_in(now, self.config.failsafe_timeout_ms());
        }
    }

    /// Feed an analysis result to the suspicion meter.
    pub fn on_analysis(&mut self, analysis: &AnalysisResult) -> u8 {
        self.suspicion.observe(analysis)
    }

    // ── Timers ───────────────────────────────────────────────────

    /// Fire every due deadline except the capture tick.
    pub fn poll_timers(&mut self, now: u64) -> Vec<ControllerEvent> {
        let mut events = Vec::new();

        if self.stall.fire(now) {
            warn!(pending = self.pending.count(), "no result for in-flight frame");
            events.push(ControllerEvent::StallWarning {
                pending: self.pending.count(),
            });
        }

        if let Some(FailsafeTransition::Engaged { silent_ms }) = self.failsafe.poll(now) {
            events.push(ControllerEvent::FailsafeEngaged { silent_ms });
        }

        if self.in_flight_expiry.fire(now) {
            let frames = self.pending.clear();
            self.stall.cancel();
            if frames > 0 {
                warn!(frames, "writing off unanswered frames");
                events.push(ControllerEvent::InFlightExpired { frames });
            }
        }

        events
    }

    /// Earliest armed deadline, capture tick included.
    pub fn next_deadline(&self) -> Option<u64> {
        earliest([
            &self.capture_tick,
            &self.stall,
            &self.in_flight_expiry,
            self.failsafe.deadline(),
        ])
    }

    // ── Queries ──────────────────────────────────────────────────

    pub fn display_source(&self) -> DisplaySource {
        if !self.connected || self.failsafe.is_fallback() {
            DisplaySource::LocalPassthrough
        } else {
            DisplaySource::Processed
        }
    }

    pub fn stats(&self) -> StreamStats {
        StreamStats {
            session_active: self.session.is_some(),
            connected: self.connected,
            visible: self.visible,
            current_rate: self.rate.current(),
            base_rate: self.rate.base(),
            pending: self.pending.count(),
            dropped: self.dropped,
            avg_latency_ms: self.latency.moving_average(),
            smoothed_rtt_ms: self.latency.smoothed_rtt_ms(),
            frames_sent: self.counters.frames_sent,
            results_received: self.counters.results_received,
            invalid_results: self.counters.invalid_results,
            send_failures: self.counters.send_failures,
            last_quality: self.last_quality,
            failsafe: self.failsafe.state(),
            display: self.display_source(),
            suspicion: self.suspicion.level(),
            recording: false,
        }
    }

    pub fn session(&self) -> Option<&CaptureSession> {
        self.session.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    /// Capturing right now: active, visible and connected.
    pub fn is_capturing(&self) -> bool {
        self.capture.is_running()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn settings(&self) -> &StreamSettings {
        &self.settings
    }

    pub fn rate(&self) -> &RateState {
        &self.rate
    }

    pub fn pending(&self) -> u32 {
        self.pending.count()
    }

    pub fn failsafe_state(&self) -> FailsafeState {
        self.failsafe.state()
    }

    // ── Internal ─────────────────────────────────────────────────

    fn resume_capture(&mut self, now: u64) {
        if self.session.is_none() || !self.visible || !self.connected {
            return;
        }
        self.capture.start();
        self.capture_tick.arm_at(now);
        self.failsafe.arm(now);
        if self.pending.in_flight() {
            self.stall.arm_if_idle(now, self.config.stall_timeout_ms());
            self.in_flight_expiry
                .arm_in(now, self.config.failsafe_timeout_ms());
        }
    }

    fn cancel_timers(&mut self) {
        self.capture_tick.cancel();
        self.stall.cancel();
        self.in_flight_expiry.cancel();
        self.failsafe.cancel();
    }

    fn schedule_next_tick(&mut self, now: u64) {
        let period = self.config.poll_interval_ms();
        let next = match self.capture_tick.at() {
            Some(at) if at + period > now => at + period,
            _ => now + period,
        };
        self.capture_tick.arm_at(next);
    }

    /// After a result: the stall timer restarts with the next send; the
    /// in-flight expiry follows whatever is still pending.
    fn settle_in_flight(&mut self, now: u64) {
        self.stall.cancel();
        if self.pending.in_flight() && self.capture.is_running() {
            self.in_flight_expiry
                .arm_in(now, self.config.failsafe_timeout_ms());
        } else {
            self.in_flight_expiry.cancel();
        }
    }

    #[cfg(test)]
    pub(crate) fn force_pending(&mut self, n: u32) {
        self.pending.set(n);
    }
}
