//! Domain-specific error types for the SafeVision stream client.
//!
//! Construction and configuration return `Result<T, StreamError>`.
//! Faults inside the control loop never escape it: they are turned
//! into state transitions and surfaced as events instead.

use thiserror::Error;

/// The canonical error type for the streaming client.
#[derive(Debug, Error)]
pub enum StreamError {
    // ── Protocol Errors ──────────────────────────────────────────
    /// Received bytes that do not start with the `SVS1` magic sequence.
    #[error("invalid magic bytes: expected SVS1")]
    InvalidMagic,

    /// A field in the packet header could not be parsed.
    #[error("invalid header: {0}")]
    InvalidHeader(&'static str),

    /// The packet payload failed checksum verification.
    #[error("checksum mismatch")]
    ChecksumMismatch,

    /// A numeric value did not map to any known enum variant.
    #[error("unknown {type_name} discriminant: {value:#x}")]
    UnknownVariant { type_name: &'static str, value: u64 },

    /// A decoded message violated its schema.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// A state machine was asked for a transition it does not allow.
    #[error("invalid transition: {0}")]
    InvalidTransition(&'static str),

    // ── Packet Errors ────────────────────────────────────────────
    /// The payload exceeds the configured maximum size.
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The received buffer is shorter or longer than expected.
    #[error("invalid packet length: expected {expected}, got {actual}")]
    InvalidPacketLength { expected: usize, actual: usize },

    // ── Connection Errors ────────────────────────────────────────
    /// The TCP/IO layer reported an error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// The transport has no live link to the processor.
    #[error("not connected to the processor")]
    NotConnected,

    /// The outbound queue is full; the frame was not sent.
    #[error("outbound queue full")]
    QueueFull,

    /// An mpsc channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    // ── Serialization Errors ─────────────────────────────────────
    /// Encoding or decoding of a payload failed.
    #[error("encoding error: {0}")]
    Encoding(String),

    // ── Application Errors ───────────────────────────────────────
    /// The capture device refused or lost the stream.
    #[error("device error: {0}")]
    Device(#[from] DeviceError),

    /// The recording collaborator rejected a request.
    #[error("recording error: {0}")]
    Recording(#[from] RecordingError),

    /// Settings or tuning values are out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

// ── DeviceError ──────────────────────────────────────────────────

/// Camera failures. All of them end the capture session; the user has
/// to re-request the stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("camera permission denied")]
    PermissionDenied,

    #[error("no camera found")]
    NotFound,

    #[error("camera capture not supported")]
    NotSupported,

    #[error("camera failure: {0}")]
    Failed(String),
}

impl DeviceError {
    /// Status text shown to the user for this failure.
    pub fn user_message(&self) -> &'static str {
        match self {
            DeviceError::PermissionDenied => {
                "Camera access was denied. Allow camera access and restart the stream."
            }
            DeviceError::NotFound => "No camera was found. Connect a camera and restart the stream.",
            DeviceError::NotSupported => "Camera capture is not supported on this device.",
            DeviceError::Failed(_) => "The camera stopped unexpectedly. Restart the stream to try again.",
        }
    }
}

// ── RecordingError ───────────────────────────────────────────────

/// Failures reported by the recording collaborator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecordingError {
    /// The service answered but refused (e.g. already recording).
    #[error("recording rejected: {0}")]
    Rejected(String),

    /// The service could not be reached.
    #[error("recording service unreachable: {0}")]
    Unreachable(String),

    /// The reply body could not be understood.
    #[error("invalid recording response: {0}")]
    InvalidResponse(String),

    /// Non-success HTTP status.
    #[error("recording service returned {status}: {message}")]
    Server { status: u16, message: String },

    /// A start/stop request is already outstanding.
    #[error("a recording request is already in progress")]
    Busy,

    /// No recording collaborator was configured.
    #[error("recording is not configured")]
    Unavailable,
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for StreamError {
    fn from(s: String) -> Self {
        StreamError::Other(s)
    }
}

impl From<&str> for StreamError {
    fn from(s: &str) -> Self {
        StreamError::Other(s.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for StreamError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        StreamError::ChannelClosed
    }
}

impl<T> From<tokio::sync::mpsc::error::TrySendError<T>> for StreamError {
    fn from(e: tokio::sync::mpsc::error::TrySendError<T>) -> Self {
        match e {
            tokio::sync::mpsc::error::TrySendError::Full(_) => StreamError::QueueFull,
            tokio::sync::mpsc::error::TrySendError::Closed(_) => StreamError::ChannelClosed,
        }
    }
}

impl From<Box<bincode::ErrorKind>> for StreamError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        StreamError::Encoding(e.to_string())
    }
}

impl From<serde_json::Error> for RecordingError {
    fn from(e: serde_json::Error) -> Self {
        RecordingError::InvalidResponse(e.to_string())
    }
}
