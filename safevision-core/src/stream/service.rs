//! Async driver for the [`StreamController`].
//!
//! One task owns the controller, the capture device and the recording flag.
//! It `select!`s over user commands, transport events, recording replies and
//! the controller's earliest deadline, and applies each one in turn. Outside
//! code talks to it through a [`StreamHandle`]: commands go in on an mpsc
//! channel, events come out on a broadcast channel, and the latest stats and
//! display frame are published on `watch` channels.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, info, trace, warn};

use crate::device::CaptureDevice;
use crate::error::{DeviceError, RecordingError, StreamError};
use crate::protocol::{AnalysisResult, OutgoingFrame, ProcessedFrame};
use crate::recording::{RecordingService, RecordingStarted, RecordingState, RecordingSummary};
use crate::stream::clock::StreamClock;
use crate::stream::config::StreamSettings;
use crate::stream::controller::{
    ControllerEvent, DropReason, ResultOutcome, StreamController, TickOutcome,
};
use crate::stream::stats::StreamStats;
use crate::stream::types::{DisplaySource, Facing, Resolution};
use crate::task::TaskGroup;
use crate::transport::{FrameTransport, TransportEvent};

const COMMAND_QUEUE_DEPTH: usize = 32;
const EVENT_CAPACITY: usize = 256;

// ── Commands & events ────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum StreamCommand {
    Start,
    Stop,
    ApplySettings(StreamSettings),
    SwitchFacing,
    SetVisible(bool),
    StartRecording,
    StopRecording,
    Shutdown,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    SessionStarted {
        facing: Facing,
        resolution: Resolution,
    },
    SessionStopped,
    FacingSwitched(Facing),
    SettingsRejected {
        message: String,
    },
    /// Terminal for the session; the user has to start again.
    DeviceFailed {
        error: DeviceError,
        message: &'static str,
    },
    Connected,
    Disconnected {
        reason: String,
    },
    FrameSent {
        sequence_id: u64,
        quality: f32,
    },
    FrameDropped {
        reason: DropReason,
        pending: u32,
    },
    ResultReceived {
        latency_ms: u64,
        sequence_id: Option<u64>,
    },
    InvalidResult {
        reason: String,
    },
    RateChanged {
        before: f64,
        after: f64,
    },
    StallWarning {
        pending: u32,
    },
    FailsafeEngaged {
        silent_ms: u64,
    },
    FailsafeRecovered,
    InFlightExpired {
        frames: u32,
    },
    Analysis {
        result: AnalysisResult,
        suspicion: u8,
    },
    RemoteError {
        message: String,
    },
    RecordingStarted(RecordingStarted),
    RecordingStopped(RecordingSummary),
    RecordingFailed {
        message: String,
    },
}

/// What the operator display should show right now.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayFrame {
    pub source: DisplaySource,
    pub bytes: Bytes,
    /// Sequence id of the processed frame, when known.
    pub sequence_id: Option<u64>,
}

impl Default for DisplayFrame {
    fn default() -> Self {
        Self {
            source: DisplaySource::LocalPassthrough,
            bytes: Bytes::new(),
            sequence_id: None,
        }
    }
}

enum RecordingReply {
    Started(Result<RecordingStarted, RecordingError>),
    Stopped(Result<RecordingSummary, RecordingError>),
}

// ── StreamHandle ─────────────────────────────────────────────────

/// Cloneable access to a running [`StreamService`].
#[derive(Clone)]
pub struct StreamHandle {
    commands: mpsc::Sender<StreamCommand>,
    events: broadcast::Sender<StreamEvent>,
    stats: watch::Receiver<StreamStats>,
    display: watch::Receiver<DisplayFrame>,
}

impl StreamHandle {
    pub async fn send(&self, command: StreamCommand) -> Result<(), StreamError> {
        Ok(self.commands.send(command).await?)
    }

    pub async fn start(&self) -> Result<(), StreamError> {
        self.send(StreamCommand::Start).await
    }

    pub async fn stop(&self) -> Result<(), StreamError> {
        self.send(StreamCommand::Stop).await
    }

    pub async fn apply_settings(&self, settings: StreamSettings) -> Result<(), StreamError> {
        self.send(StreamCommand::ApplySettings(settings)).await
    }

    pub async fn switch_facing(&self) -> Result<(), StreamError> {
        self.send(StreamCommand::SwitchFacing).await
    }

    pub async fn set_visible(&self, visible: bool) -> Result<(), StreamError> {
        self.send(StreamCommand::SetVisible(visible)).await
    }

    pub async fn start_recording(&self) -> Result<(), StreamError> {
        self.send(StreamCommand::StartRecording).await
    }

    pub async fn stop_recording(&self) -> Result<(), StreamError> {
        self.send(StreamCommand::StopRecording).await
    }

    pub async fn shutdown(&self) -> Result<(), StreamError> {
        self.send(StreamCommand::Shutdown).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.events.subscribe()
    }

    /// Latest published stats.
    pub fn stats(&self) -> StreamStats {
        self.stats.borrow().clone()
    }

    pub fn stats_receiver(&self) -> watch::Receiver<StreamStats> {
        self.stats.clone()
    }

    pub fn display_receiver(&self) -> watch::Receiver<DisplayFrame> {
        self.display.clone()
    }
}

// ── StreamService ────────────────────────────────────────────────

pub struct StreamService {
    controller: StreamController,
    clock: StreamClock,
    device: Box<dyn CaptureDevice>,
    transport: Arc<dyn FrameTransport>,
    transport_events: mpsc::Receiver<TransportEvent>,
    transport_open: bool,
    recorder: Option<Arc<dyn RecordingService>>,
    recording: RecordingState,
    session_id: String,
    commands: mpsc::Receiver<StreamCommand>,
    events: broadcast::Sender<StreamEvent>,
    stats_tx: watch::Sender<StreamStats>,
    display_tx: watch::Sender<DisplayFrame>,
    replies_tx: mpsc::Sender<RecordingReply>,
    replies_rx: mpsc::Receiver<RecordingReply>,
    tasks: TaskGroup,
}

impl StreamService {
    pub fn new(
        controller: StreamController,
        device: Box<dyn CaptureDevice>,
        transport: Arc<dyn FrameTransport>,
        transport_events: mpsc::Receiver<TransportEvent>,
    ) -> (Self, StreamHandle) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let (stats_tx, stats_rx) = watch::channel(controller.stats());
        let (display_tx, display_rx) = watch::channel(DisplayFrame::default());
        let (replies_tx, replies_rx) = mpsc::channel(4);

        let handle = StreamHandle {
            commands: command_tx,
            events: event_tx.clone(),
            stats: stats_rx,
            display: display_rx,
        };

        let service = Self {
            controller,
            clock: StreamClock::new(),
            device,
            transport,
            transport_events,
            transport_open: true,
            recorder: None,
            recording: RecordingState::Idle,
            session_id: "default".to_string(),
            commands: command_rx,
            events: event_tx,
            stats_tx,
            display_tx,
            replies_tx,
            replies_rx,
            tasks: TaskGroup::new("stream-service"),
        };
        (service, handle)
    }

    pub fn with_recorder(
        mut self,
        recorder: Arc<dyn RecordingService>,
        session_id: impl Into<String>,
    ) -> Self {
        self.recorder = Some(recorder);
        self.session_id = session_id.into();
        self
    }

    pub fn with_clock(mut self, clock: StreamClock) -> Self {
        self.clock = clock;
        self
    }

    /// Run until [`StreamCommand::Shutdown`] or every handle is dropped.
    pub async fn run(mut self) {
        info!(session_id = %self.session_id, "stream service running");

        loop {
            self.publish_stats();
            let wake = self
                .controller
                .next_deadline()
                .map(|ms| self.clock.instant_at(ms));

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(StreamCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                event = self.transport_events.recv(), if self.transport_open => match event {
                    Some(event) => self.handle_transport(event),
                    None => {
                        warn!("transport event channel closed");
                        self.transport_open = false;
                        self.controller.on_disconnect();
                        self.emit(StreamEvent::Disconnected {
                            reason: "transport closed".to_string(),
                        });
                    }
                },
                Some(reply) = self.replies_rx.recv() => self.handle_recording_reply(reply),
                _ = sleep_until_opt(wake), if wake.is_some() => self.handle_deadlines().await,
            }
        }

        self.shutdown().await;
    }

    // ── Commands ─────────────────────────────────────────────────

    async fn handle_command(&mut self, command: StreamCommand) {
        debug!(?command, "command");
        match command {
            StreamCommand::Start => self.start_session().await,
            StreamCommand::Stop => self.stop_session().await,
            StreamCommand::ApplySettings(settings) => self.apply_settings(settings).await,
            StreamCommand::SwitchFacing => self.switch_facing().await,
            StreamCommand::SetVisible(visible) => {
                let now = self.clock.now_ms();
                self.controller.set_visible(visible, now);
            }
            StreamCommand::StartRecording => self.start_recording(),
            StreamCommand::StopRecording => self.stop_recording(),
            // handled by the run loop
            StreamCommand::Shutdown => {}
        }
    }

    async fn start_session(&mut self) {
        let settings = self.controller.settings().clone();
        if let Err(e) = self
            .device
            .request_stream(settings.facing, settings.resolution)
            .await
        {
            self.device_failed(e).await;
            return;
        }
        let session = self.controller.start(self.clock.now_ms());
        self.emit(StreamEvent::SessionStarted {
            facing: session.facing,
            resolution: session.resolution,
        });
    }

    async fn stop_session(&mut self) {
        if self.controller.stop() {
            self.device.release().await;
            self.emit(StreamEvent::SessionStopped);
        }
    }

    async fn apply_settings(&mut self, settings: StreamSettings) {
        if let Err(e) = settings.validate() {
            warn!(error = %e, "settings rejected");
            self.emit(StreamEvent::SettingsRejected {
                message: e.to_string(),
            });
            return;
        }

        if self.controller.is_active() {
            if let Err(e) = self
                .device
                .request_stream(settings.facing, settings.resolution)
                .await
            {
                self.device_failed(e).await;
                return;
            }
        }

        let now = self.clock.now_ms();
        match self.controller.apply_settings(settings, now) {
            Ok(()) => {
                if let Some(session) = self.controller.session() {
                    self.emit(StreamEvent::SessionStarted {
                        facing: session.facing,
                        resolution: session.resolution,
                    });
                }
            }
            Err(e) => self.emit(StreamEvent::SettingsRejected {
                message: e.to_string(),
            }),
        }
    }

    async fn switch_facing(&mut self) {
        if self.controller.is_active() {
            if let Err(e) = self.device.switch_facing().await {
                self.device_failed(e).await;
                return;
            }
        }
        let facing = self.controller.switch_facing(self.clock.now_ms());
        info!(%facing, "camera switched");
        self.emit(StreamEvent::FacingSwitched(facing));
    }

    async fn device_failed(&mut self, error: DeviceError) {
        error!(%error, "capture device failed");
        self.controller.stop();
        self.device.release().await;
        self.emit(StreamEvent::DeviceFailed {
            message: error.user_message(),
            error,
        });
    }

    // ── Recording ────────────────────────────────────────────────

    fn start_recording(&mut self) {
        let Some(recorder) = self.recorder.clone() else {
            self.recording_failed(RecordingError::Unavailable);
            return;
        };
        if self.recording.is_busy() || self.recording.is_recording() {
            self.recording_failed(RecordingError::Busy);
            return;
        }

        self.recording = RecordingState::Starting;
        let replies = self.replies_tx.clone();
        let session_id = self.session_id.clone();
        self.tasks.spawn(async move {
            let result = recorder.start_recording(&session_id).await;
            let _ = replies.send(RecordingReply::Started(result)).await;
        });
    }

    fn stop_recording(&mut self) {
        let Some(recorder) = self.recorder.clone() else {
            self.recording_failed(RecordingError::Unavailable);
            return;
        };
        let filename = match &self.recording {
            RecordingState::Recording { filename } => filename.clone(),
            _ => {
                self.recording_failed(RecordingError::Busy);
                return;
            }
        };

        self.recording = RecordingState::Stopping { filename };
        let replies = self.replies_tx.clone();
        let session_id = self.session_id.clone();
        self.tasks.spawn(async move {
            let result = recorder.stop_recording(&session_id).await;
            let _ = replies.send(RecordingReply::Stopped(result)).await;
        });
    }

    fn handle_recording_reply(&mut self, reply: RecordingReply) {
        match reply {
            RecordingReply::Started(Ok(started)) => {
                info!(filename = %started.filename, "recording started");
                self.recording = RecordingState::Recording {
                    filename: started.filename.clone(),
                };
                self.emit(StreamEvent::RecordingStarted(started));
            }
            RecordingReply::Started(Err(e)) => {
                self.recording = RecordingState::Idle;
                self.recording_failed(e);
            }
            RecordingReply::Stopped(Ok(summary)) => {
                info!(
                    duration_seconds = summary.duration_seconds,
                    frame_count = summary.frame_count,
                    "recording stopped"
                );
                self.recording = RecordingState::Idle;
                self.emit(StreamEvent::RecordingStopped(summary));
            }
            RecordingReply::Stopped(Err(e)) => {
                if let RecordingState::Stopping { filename } = &self.recording {
                    self.recording = RecordingState::Recording {
                        filename: filename.clone(),
                    };
                }
                self.recording_failed(e);
            }
        }
    }

    fn recording_failed(&mut self, error: RecordingError) {
        warn!(%error, "recording request failed");
        self.emit(StreamEvent::RecordingFailed {
            message: error.to_string(),
        });
    }

    // ── Transport ────────────────────────────────────────────────

    fn handle_transport(&mut self, event: TransportEvent) {
        let now = self.clock.now_ms();
        match event {
            TransportEvent::Connected => {
                self.controller.on_reconnect(now);
                self.emit(StreamEvent::Connected);
            }
            TransportEvent::Disconnected { reason } => {
                self.controller.on_disconnect();
                self.emit(StreamEvent::Disconnected { reason });
            }
            TransportEvent::Processed(frame) => self.handle_processed(frame, now),
            TransportEvent::Analysis(result) => {
                let suspicion = self.controller.on_analysis(&result);
                trace!(people = result.people_count, suspicion, "analysis");
                self.emit(StreamEvent::Analysis { result, suspicion });
            }
            TransportEvent::RemoteError(err) => {
                self.controller.on_invalid_result(&err.message, now);
                self.emit(StreamEvent::RemoteError {
                    message: err.message,
                });
            }
            TransportEvent::MalformedResult { reason } => {
                self.controller.on_invalid_result(&reason, now);
                self.emit(StreamEvent::InvalidResult { reason });
            }
        }
    }

    fn handle_processed(&mut self, frame: ProcessedFrame, now: u64) {
        match self.controller.on_result(&frame, now) {
            ResultOutcome::Accepted {
                latency_ms,
                rate,
                recovered,
            } => {
                if recovered {
                    self.emit(StreamEvent::FailsafeRecovered);
                }
                if let Some(change) = rate.filter(|c| c.changed()) {
                    self.emit(StreamEvent::RateChanged {
                        before: change.before,
                        after: change.after,
                    });
                }
                if self.controller.display_source() == DisplaySource::Processed {
                    self.display_tx.send_replace(DisplayFrame {
                        source: DisplaySource::Processed,
                        bytes: Bytes::copy_from_slice(&frame.frame_bytes),
                        sequence_id: frame.sequence_id,
                    });
                }
                self.emit(StreamEvent::ResultReceived {
                    latency_ms,
                    sequence_id: frame.sequence_id,
                });
            }
            ResultOutcome::Invalid { reason } => {
                self.emit(StreamEvent::InvalidResult { reason });
            }
            ResultOutcome::Ignored => {
                trace!(sequence_id = ?frame.sequence_id, "result outside a session");
            }
        }
    }

    // ── Deadlines ────────────────────────────────────────────────

    async fn handle_deadlines(&mut self) {
        let now = self.clock.now_ms();
        for event in self.controller.poll_timers(now) {
            self.emit(match event {
                ControllerEvent::StallWarning { pending } => StreamEvent::StallWarning { pending },
                ControllerEvent::FailsafeEngaged { silent_ms } => {
                    StreamEvent::FailsafeEngaged { silent_ms }
                }
                ControllerEvent::InFlightExpired { frames } => {
                    StreamEvent::InFlightExpired { frames }
                }
            });
        }
        if self.controller.tick_due(now) {
            self.tick(now).await;
        }
    }

    async fn tick(&mut self, now: u64) {
        let passthrough = self.controller.display_source() == DisplaySource::LocalPassthrough;

        match self.controller.on_tick(now) {
            TickOutcome::Idle => {}
            TickOutcome::Dropped { reason, pending } => {
                self.emit(StreamEvent::FrameDropped { reason, pending });
                if passthrough {
                    let quality = self.controller.settings().video_quality;
                    match self.device.grab_frame(quality).await {
                        Ok(bytes) => self.show_local(Bytes::from(bytes)),
                        Err(e) => self.device_failed(e).await,
                    }
                }
            }
            TickOutcome::Send {
                sequence_id,
                sent_timestamp,
                quality,
            } => {
                let frame_bytes = match self.device.grab_frame(quality).await {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        self.controller.on_send_failed(self.clock.now_ms());
                        self.device_failed(e).await;
                        return;
                    }
                };
                if passthrough {
                    self.show_local(Bytes::copy_from_slice(&frame_bytes));
                }

                let frame = OutgoingFrame {
                    frame_bytes,
                    sent_timestamp,
                    sequence_id,
                    quality,
                };
                match self.transport.send(frame) {
                    Ok(()) => self.emit(StreamEvent::FrameSent {
                        sequence_id,
                        quality,
                    }),
                    Err(e) => {
                        warn!(sequence_id, error = %e, "send failed");
                        self.controller.on_send_failed(self.clock.now_ms());
                    }
                }
            }
        }
    }

    // ── Output ───────────────────────────────────────────────────

    fn show_local(&self, bytes: Bytes) {
        self.display_tx.send_replace(DisplayFrame {
            source: DisplaySource::LocalPassthrough,
            bytes,
            sequence_id: None,
        });
    }

    fn emit(&self, event: StreamEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    fn publish_stats(&self) {
        let mut stats = self.controller.stats();
        stats.recording = self.recording.is_recording();
        self.stats_tx.send_if_modified(|current| {
            if *current == stats {
                false
            } else {
                *current = stats;
                true
            }
        });
    }

    async fn shutdown(&mut self) {
        if self.controller.stop() {
            self.emit(StreamEvent::SessionStopped);
        }
        self.device.release().await;
        self.transport.shutdown().await;
        self.tasks.abort_all();
        self.publish_stats();
        info!("stream service stopped");
    }
}

async fn sleep_until_opt(at: Option<tokio::time::Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
