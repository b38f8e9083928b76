//! # safevision-core
//!
//! Adaptive frame streaming for the SafeVision camera client.
//!
//! This crate contains:
//! - **Wire format**: `PacketHeader`, `Packet`, `MessageKind`, `PacketFlags`
//! - **Protocol payloads**: `OutgoingFrame`, `ProcessedFrame`, `AnalysisResult`, `RemoteError`
//! - **Codec**: `StreamCodec` for framed TCP I/O via `tokio_util`
//! - **Transport**: `FrameTransport` with a reconnecting TCP link and an in-process loopback
//! - **Stream**: `StreamController` (rate adaptation, backpressure, failsafe) and the
//!   `StreamService` that drives it
//! - **Device / recording**: the camera and recording collaborator seams
//! - **Task**: `TaskGroup` for spawned work that is aborted on drop
//! - **Error**: `StreamError`, `DeviceError`, `RecordingError`

pub mod codec;
pub mod device;
pub mod error;
pub mod flags;
pub mod header;
pub mod message;
pub mod packet;
pub mod protocol;
pub mod recording;
pub mod stream;
pub mod task;
pub mod transport;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use codec::StreamCodec;
pub use device::{CaptureDevice, SyntheticCamera};
pub use error::{DeviceError, RecordingError, StreamError};
pub use flags::PacketFlags;
pub use header::{HEADER_SIZE, PacketHeader};
pub use message::MessageKind;
pub use packet::{MAX_FRAME_SIZE, MAX_PAYLOAD_SIZE, Packet};
pub use protocol::{AnalysisResult, OutgoingFrame, ProcessedFrame, RemoteError, WireMessage};
pub use recording::{RecordingService, RecordingStarted, RecordingState, RecordingSummary};
pub use stream::{
    AdaptationConfig, DisplayFrame, DisplaySource, Facing, FailsafeState, LagLevel, Resolution,
    StreamClock, StreamCommand, StreamController, StreamEvent, StreamHandle, StreamService,
    StreamSettings, StreamStats,
};
pub use task::TaskGroup;
pub use transport::{
    ConnectionPhase, FrameTransport, LoopbackConfig, LoopbackHandle, LoopbackTransport,
    TcpTransport, TcpTransportConfig, TransportEvent,
};
