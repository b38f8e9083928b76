//! Frame streaming protocol.
//!
//! # Wire Protocol
//!
//! ```text
//! Client ──[StreamFrame]──────────► Processor
//!   Payload: OutgoingFrame (bincode)
//!
//! Processor ──[ProcessedFrame]────► Client      (one per StreamFrame)
//!   Payload: ProcessedFrame (bincode)
//!
//! Processor ──[AnalysisResult]────► Client      (optional, display only)
//!   Payload: AnalysisResult (bincode)
//!
//! Processor ──[RemoteError]───────► Client      (instead of ProcessedFrame)
//!   Payload: RemoteError (bincode)
//! ```

use serde::{Deserialize, Serialize};

use crate::error::StreamError;
use crate::message::MessageKind;
use crate::protocol::WireMessage;

// ── Outgoing Frame ───────────────────────────────────────────────

/// A captured frame on its way to the processor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutgoingFrame {
    /// Encoded image bytes. Opaque to the streaming layer.
    pub frame_bytes: Vec<u8>,

    /// Wall-clock milliseconds at send time; echoed back by the processor.
    pub sent_timestamp: u64,

    /// Monotonically increasing per client.
    pub sequence_id: u64,

    /// Encode quality in `[0, 1]`.
    pub quality: f32,
}

impl WireMessage for OutgoingFrame {
    const KIND: MessageKind = MessageKind::StreamFrame;

    fn validate(&self) -> Result<(), StreamError> {
        if !(0.0..=1.0).contains(&self.quality) {
            return Err(StreamError::InvalidMessage(format!(
                "quality {} outside [0, 1]",
                self.quality
            )));
        }
        Ok(())
    }
}

// ── Processed Frame ──────────────────────────────────────────────

/// The processor's answer to one [`OutgoingFrame`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessedFrame {
    /// Annotated image bytes. Empty means the processor produced nothing.
    pub frame_bytes: Vec<u8>,

    /// `sent_timestamp` of the frame this answers.
    pub echoed_timestamp: u64,

    /// Sequence id of the frame this answers, if the processor tracks it.
    pub sequence_id: Option<u64>,
}

impl ProcessedFrame {
    /// Echo `frame` back unchanged, as a pass-through processor would.
    pub fn echo(frame: &OutgoingFrame) -> Self {
        Self {
            frame_bytes: frame.frame_bytes.clone(),
            echoed_timestamp: frame.sent_timestamp,
            sequence_id: Some(frame.sequence_id),
        }
    }

    /// Empty results release their pending slot but count for nothing else.
    pub fn is_empty(&self) -> bool {
        self.frame_bytes.is_empty()
    }
}

impl WireMessage for ProcessedFrame {
    const KIND: MessageKind = MessageKind::ProcessedFrame;
}

// ── Analysis Result ──────────────────────────────────────────────

/// Detection summary for the operator display.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnalysisResult {
    pub people_count: u32,
    pub behaviors: Vec<String>,
    pub behavior_detected: bool,
}

impl WireMessage for AnalysisResult {
    const KIND: MessageKind = MessageKind::AnalysisResult;
}

// ── Remote Error ─────────────────────────────────────────────────

/// Sent in place of a [`ProcessedFrame`] when processing failed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteError {
    pub message: String,
}

impl RemoteError {
    pub fn frame_processing_failed() -> Self {
        Self {
            message: "Frame processing failed".to_string(),
        }
    }
}

impl WireMessage for RemoteError {
    const KIND: MessageKind = MessageKind::RemoteError;
}
