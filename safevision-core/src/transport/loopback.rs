//! In-process processor for demos and tests.
//!
//! Every frame sent is answered after a configurable latency with a
//! `ProcessedFrame` echoing its timestamp, plus an optional analysis
//! result. A [`LoopbackHandle`] can change the latency at runtime, make the
//! processor go silent, or drop and restore the link. Responses are built as
//! real packets and decoded with [`TransportEvent::from_packet`], so the
//! loopback exercises the same payload path as the TCP link.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio_util::time::DelayQueue;
use tracing::{debug, info, trace, warn};

use crate::error::StreamError;
use crate::packet::Packet;
use crate::protocol::{AnalysisResult, OutgoingFrame, ProcessedFrame, RemoteError, WireMessage};
use crate::task::TaskGroup;
use crate::transport::{EVENT_QUEUE_DEPTH, FrameTransport, TransportEvent, check_outgoing};

/// Behaviour of the simulated processor.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopbackConfig {
    /// Round-trip delay added to every frame.
    pub latency: Duration,

    /// Swallow frames without answering.
    pub silent: bool,

    /// Answer with empty `ProcessedFrame`s.
    pub blank_results: bool,

    /// Answer with `RemoteError` instead of a processed frame.
    pub fail_processing: bool,

    /// Sent alongside every processed frame when set.
    pub analysis: Option<AnalysisResult>,

    /// Link state; `false` behaves like a dropped connection.
    pub link_up: bool,

    pub queue_depth: usize,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            latency: Duration::from_millis(150),
            silent: false,
            blank_results: false,
            fail_processing: false,
            analysis: None,
            link_up: true,
            queue_depth: 8,
        }
    }
}

pub struct LoopbackTransport {
    outbound: mpsc::Sender<OutgoingFrame>,
    connected: Arc<AtomicBool>,
    control: Arc<watch::Sender<LoopbackConfig>>,
    tasks: Mutex<TaskGroup>,
}

/// Runtime control over a running [`LoopbackTransport`].
#[derive(Clone)]
pub struct LoopbackHandle {
    control: Arc<watch::Sender<LoopbackConfig>>,
}

impl LoopbackHandle {
    pub fn set_latency(&self, latency: Duration) {
        self.control.send_modify(|c| c.latency = latency);
    }

    pub fn set_silent(&self, silent: bool) {
        self.control.send_modify(|c| c.silent = silent);
    }

    pub fn set_blank_results(&self, blank: bool) {
        self.control.send_modify(|c| c.blank_results = blank);
    }

    pub fn set_fail_processing(&self, fail: bool) {
        self.control.send_modify(|c| c.fail_processing = fail);
    }

    pub fn disconnect(&self) {
        self.control.send_modify(|c| c.link_up = false);
    }

    pub fn reconnect(&self) {
        self.control.send_modify(|c| c.link_up = true);
    }

    pub fn config(&self) -> LoopbackConfig {
        self.control.borrow().clone()
    }
}

impl LoopbackTransport {
    pub fn spawn(config: LoopbackConfig) -> (Self, mpsc::Receiver<TransportEvent>) {
        let (outbound_tx, outbound_rx) = mpsc::channel(config.queue_depth.max(1));
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let (control_tx, control_rx) = watch::channel(config);
        let connected = Arc::new(AtomicBool::new(false));

        let mut tasks = TaskGroup::new("loopback");
        tasks.spawn(run_processor(
            outbound_rx,
            event_tx,
            control_rx,
            connected.clone(),
        ));

        let transport = Self {
            outbound: outbound_tx,
            connected,
            control: Arc::new(control_tx),
            tasks: Mutex::new(tasks),
        };
        (transport, event_rx)
    }

    pub fn handle(&self) -> LoopbackHandle {
        LoopbackHandle {
            control: self.control.clone(),
        }
    }
}

#[async_trait]
impl FrameTransport for LoopbackTransport {
    fn send(&self, frame: OutgoingFrame) -> Result<(), StreamError> {
        if !self.is_connected() {
            return Err(StreamError::NotConnected);
        }
        check_outgoing(&frame)?;
        Ok(self.outbound.try_send(frame)?)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn shutdown(&self) {
        self.connected.store(false, Ordering::Release);
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.abort_all();
        }
    }
}

async fn run_processor(
    mut outbound: mpsc::Receiver<OutgoingFrame>,
    events: mpsc::Sender<TransportEvent>,
    mut control: watch::Receiver<LoopbackConfig>,
    connected: Arc<AtomicBool>,
) {
    let mut in_flight: DelayQueue<OutgoingFrame> = DelayQueue::new();
    let mut link_up = control.borrow_and_update().link_up;

    if link_up {
        connected.store(true, Ordering::Release);
        if events.send(TransportEvent::Connected).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    debug!("loopback transport dropped");
                    return;
                };
                let config = control.borrow().clone();
                if !link_up || config.silent {
                    trace!(sequence_id = frame.sequence_id, "loopback swallowing frame");
                    continue;
                }
                in_flight.insert(frame, config.latency);
            }
            Some(expired) = in_flight.next(), if !in_flight.is_empty() => {
                let frame = expired.into_inner();
                let config = control.borrow().clone();
                if config.silent {
                    continue;
                }
                for event in respond(&frame, &config) {
                    if events.send(event).await.is_err() {
                        return;
                    }
                }
            }
            changed = control.changed() => {
                if changed.is_err() {
                    return;
                }
                let up = control.borrow_and_update().link_up;
                if up == link_up {
                    continue;
                }
                link_up = up;
                connected.store(up, Ordering::Release);
                let event = if up {
                    info!("loopback link restored");
                    TransportEvent::Connected
                } else {
                    info!(dropped = in_flight.len(), "loopback link dropped");
                    in_flight.clear();
                    TransportEvent::Disconnected {
                        reason: "loopback link dropped".to_string(),
                    }
                };
                if events.send(event).await.is_err() {
                    return;
                }
            }
        }
    }
}

/// Build the processor's answer to `frame` and decode it like inbound traffic.
fn respond(frame: &OutgoingFrame, config: &LoopbackConfig) -> Vec<TransportEvent> {
    let mut packets: Vec<Result<Packet, StreamError>> = Vec::with_capacity(2);

    if config.fail_processing {
        packets.push(RemoteError::frame_processing_failed().to_packet());
    } else {
        let mut processed = ProcessedFrame::echo(frame);
        if config.blank_results {
            processed.frame_bytes.clear();
        }
        packets.push(processed.to_packet());
        if let Some(analysis) = &config.analysis {
            packets.push(analysis.to_packet());
        }
    }

    packets
        .into_iter()
        .filter_map(|packet| match packet {
            Ok(packet) => TransportEvent::from_packet(&packet),
            Err(e) => {
                warn!(error = %e, "loopback failed to build a response");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(sequence_id: u64) -> OutgoingFrame {
        OutgoingFrame {
            frame_bytes: vec![0xAB; 16],
            sent_timestamp: 1_000 + sequence_id,
            sequence_id,
            quality: 0.8,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn echoes_after_latency() {
        let (transport, mut events) = LoopbackTransport::spawn(LoopbackConfig {
            latency: Duration::from_millis(200),
            ..Default::default()
        });
        assert_eq!(events.recv().await, Some(TransportEvent::Connected));
        assert!(transport.is_connected());

        transport.send(frame(7)).unwrap();
        let started = tokio::time::Instant::now();
        match events.recv().await {
            Some(TransportEvent::Processed(processed)) => {
                assert_eq!(processed.sequence_id, Some(7));
                assert_eq!(processed.echoed_timestamp, 1_007);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_processor_never_answers() {
        let (transport, mut events) = LoopbackTransport::spawn(LoopbackConfig::default());
        assert_eq!(events.recv().await, Some(TransportEvent::Connected));

        transport.handle().set_silent(true);
        tokio::task::yield_now().await;
        transport.send(frame(1)).unwrap();

        let waited = tokio::time::timeout(Duration::from_secs(30), events.recv()).await;
        assert!(waited.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_and_reconnect_emit_edges() {
        let (transport, mut events) = LoopbackTransport::spawn(LoopbackConfig::default());
        assert_eq!(events.recv().await, Some(TransportEvent::Connected));

        let handle = transport.handle();
        handle.disconnect();
        assert!(matches!(
            events.recv().await,
            Some(TransportEvent::Disconnected { .. })
        ));
        assert!(!transport.is_connected());
        assert!(matches!(transport.send(frame(2)), Err(StreamError::NotConnected)));

        handle.reconnect();
        assert_eq!(events.recv().await, Some(TransportEvent::Connected));
        assert!(transport.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn failing_processor_sends_remote_error() {
        let (transport, mut events) = LoopbackTransport::spawn(LoopbackConfig {
            fail_processing: true,
            ..Default::default()
        });
        assert_eq!(events.recv().await, Some(TransportEvent::Connected));

        transport.send(frame(3)).unwrap();
        match events.recv().await {
            Some(TransportEvent::RemoteError(err)) => {
                assert_eq!(err.message, "Frame processing failed");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn respond_includes_analysis_when_configured() {
        let config = LoopbackConfig {
            analysis: Some(AnalysisResult {
                people_count: 1,
                behaviors: vec![],
                behavior_detected: false,
            }),
            ..Default::default()
        };
        let events = respond(&frame(4), &config);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], TransportEvent::Analysis(_)));
    }

    #[test]
    fn blank_results_are_empty() {
        let config = LoopbackConfig {
            blank_results: true,
            ..Default::default()
        };
        match &respond(&frame(5), &config)[0] {
            TransportEvent::Processed(p) => assert!(p.is_empty()),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
