//! Duplex link between the client and the remote processor.
//!
//! | Implementation | Link |
//! |---|---|
//! | [`TcpTransport`] | `Framed<TcpStream, StreamCodec>` with heartbeat and bounded reconnect |
//! | [`LoopbackTransport`] | in-process echo processor with adjustable latency |
//!
//! Both hand inbound traffic to the caller as [`TransportEvent`]s on an
//! mpsc channel. Sending never blocks: a full queue is an error the
//! controller accounts for like any other send failure.

pub mod loopback;
pub mod phase;
pub mod tcp;

pub use loopback::{LoopbackConfig, LoopbackHandle, LoopbackTransport};
pub use phase::ConnectionPhase;
pub use tcp::{TcpTransport, TcpTransportConfig};

use async_trait::async_trait;
use tracing::{trace, warn};

use crate::error::StreamError;
use crate::message::MessageKind;
use crate::packet::{MAX_PAYLOAD_SIZE, Packet};
use crate::protocol::{AnalysisResult, OutgoingFrame, ProcessedFrame, RemoteError, WireMessage};

/// Capacity of the inbound event channel.
pub const EVENT_QUEUE_DEPTH: usize = 64;

/// Something the transport observed.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected,
    Disconnected { reason: String },
    Processed(ProcessedFrame),
    Analysis(AnalysisResult),
    RemoteError(RemoteError),
    /// A result-kind packet whose payload could not be decoded. Still
    /// answers one sent frame.
    MalformedResult { reason: String },
}

impl TransportEvent {
    /// Map an inbound packet to an event. Heartbeats and packets that
    /// carry nothing for the client yield `None`.
    pub fn from_packet(packet: &Packet) -> Option<Self> {
        match packet.kind() {
            MessageKind::Heartbeat => {
                trace!("heartbeat");
                None
            }
            MessageKind::StreamFrame => {
                warn!("processor sent a StreamFrame; ignoring");
                None
            }
            MessageKind::ProcessedFrame => Some(match ProcessedFrame::from_packet(packet) {
                Ok(frame) => TransportEvent::Processed(frame),
                Err(e) => TransportEvent::MalformedResult {
                    reason: e.to_string(),
                },
            }),
            MessageKind::RemoteError => Some(match RemoteError::from_packet(packet) {
                Ok(err) => TransportEvent::RemoteError(err),
                Err(e) => TransportEvent::MalformedResult {
                    reason: e.to_string(),
                },
            }),
            MessageKind::AnalysisResult => match AnalysisResult::from_packet(packet) {
                Ok(analysis) => Some(TransportEvent::Analysis(analysis)),
                Err(e) => {
                    warn!(error = %e, "dropping undecodable analysis result");
                    None
                }
            },
        }
    }

    /// `true` for events that answer exactly one sent frame.
    pub fn is_result(&self) -> bool {
        matches!(
            self,
            TransportEvent::Processed(_)
                | TransportEvent::RemoteError(_)
                | TransportEvent::MalformedResult { .. }
        )
    }
}

/// A link that carries frames out and results back.
#[async_trait]
pub trait FrameTransport: Send + Sync {
    /// Queue `frame` for sending without waiting.
    fn send(&self, frame: OutgoingFrame) -> Result<(), StreamError>;

    fn is_connected(&self) -> bool;

    /// Stop all background work. Further sends fail.
    async fn shutdown(&self);
}

/// Checks shared by every transport before a frame is queued.
pub(crate) fn check_outgoing(frame: &OutgoingFrame) -> Result<(), StreamError> {
    frame.validate()?;
    // bincode adds fixed-size fields around the image bytes
    let limit = MAX_PAYLOAD_SIZE - 64;
    if frame.frame_bytes.len() > limit {
        return Err(StreamError::PayloadTooLarge {
            size: frame.frame_bytes.len(),
            max: limit,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn processed_packet_becomes_processed_event() {
        let frame = ProcessedFrame {
            frame_bytes: vec![1, 2, 3],
            echoed_timestamp: 99,
            sequence_id: None,
        };
        let event = TransportEvent::from_packet(&frame.to_packet().unwrap()).unwrap();
        assert_eq!(event, TransportEvent::Processed(frame));
        assert!(event.is_result());
    }

    #[test]
    fn garbage_result_payload_is_malformed_result() {
        let pkt = Packet::new(MessageKind::ProcessedFrame, vec![0xFFu8; 2]).unwrap();
        let event = TransportEvent::from_packet(&pkt).unwrap();
        assert!(matches!(event, TransportEvent::MalformedResult { .. }));
        assert!(event.is_result());
    }

    #[test]
    fn heartbeat_yields_nothing() {
        assert!(TransportEvent::from_packet(&Packet::heartbeat()).is_none());
    }

    #[test]
    fn analysis_is_not_a_result() {
        let analysis = AnalysisResult {
            people_count: 2,
            behaviors: vec!["loitering".into()],
            behavior_detected: true,
        };
        let event = TransportEvent::from_packet(&analysis.to_packet().unwrap()).unwrap();
        assert!(!event.is_result());
    }

    #[test]
    fn oversize_frame_fails_outgoing_check() {
        let frame = OutgoingFrame {
            frame_bytes: vec![0u8; MAX_PAYLOAD_SIZE],
            sent_timestamp: 0,
            sequence_id: 0,
            quality: 0.5,
        };
        assert!(matches!(
            check_outgoing(&frame),
            Err(StreamError::PayloadTooLarge { .. })
        ));
    }
}
