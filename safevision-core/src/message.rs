//! Message kinds carried by the stream protocol.
//!
//! Unknown discriminants decode to an error instead of panicking.

use crate::error::StreamError;
use std::fmt;

// ── MessageKind ──────────────────────────────────────────────────

/// Discriminates the payload of a [`Packet`](crate::packet::Packet).
///
/// - `0x01`: client → processor camera frame
/// - `0x02..0x04`: processor → client replies
/// - `0x10`: keep-alive, either direction
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Outgoing camera frame awaiting processing.
    StreamFrame = 0x01,
    /// Processed frame echoing the original send timestamp.
    ProcessedFrame = 0x02,
    /// Detection summary for display.
    AnalysisResult = 0x03,
    /// The processor failed on one frame.
    RemoteError = 0x04,
    /// Periodic heartbeat with an empty payload.
    Heartbeat = 0x10,
}

impl MessageKind {
    /// Kinds that answer exactly one sent frame and therefore release
    /// a pending slot, even when their payload is unusable.
    pub fn is_result(self) -> bool {
        matches!(self, MessageKind::ProcessedFrame | MessageKind::RemoteError)
    }
}

impl TryFrom<u32> for MessageKind {
    type Error = StreamError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(MessageKind::StreamFrame),
            0x02 => Ok(MessageKind::ProcessedFrame),
            0x03 => Ok(MessageKind::AnalysisResult),
            0x04 => Ok(MessageKind::RemoteError),
            0x10 => Ok(MessageKind::Heartbeat),
            _ => Err(StreamError::UnknownVariant {
                type_name: "MessageKind",
                value: value as u64,
            }),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::StreamFrame => write!(f, "StreamFrame"),
            MessageKind::ProcessedFrame => write!(f, "ProcessedFrame"),
            MessageKind::AnalysisResult => write!(f, "AnalysisResult"),
            MessageKind::RemoteError => write!(f, "RemoteError"),
            MessageKind::Heartbeat => write!(f, "Heartbeat"),
        }
    }
}
