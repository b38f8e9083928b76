//! Adaptive frame streaming.
//!
//! | Module       | Responsibility                                        |
//! |--------------|-------------------------------------------------------|
//! | `config`     | User settings and adaptation tuning                   |
//! | `rate`       | Frame-rate state and latency-band adjustments         |
//! | `latency`    | Sliding latency window and smoothed RTT               |
//! | `quality`    | Per-frame quality under load                          |
//! | `gate`       | Pending-frame accounting and send/drop decisions      |
//! | `failsafe`   | Silence detection and local passthrough fallback      |
//! | `capture`    | Rate-paced capture loop                               |
//! | `controller` | The state machine tying the above together            |
//! | `service`    | Async driver wiring device, transport and controller  |

pub mod capture;
pub mod clock;
pub mod config;
pub mod controller;
pub mod failsafe;
pub mod gate;
pub mod latency;
pub mod quality;
pub mod rate;
pub mod service;
pub mod stats;
pub mod suspicion;
pub mod timer;
pub mod types;

pub use clock::StreamClock;
pub use config::{AdaptationConfig, LatencyBands, RecoveryRule, StreamSettings};
pub use controller::{ControllerEvent, DropReason, ResultOutcome, StreamController, TickOutcome};
pub use failsafe::{FailsafeMonitor, FailsafeTransition};
pub use gate::{GateDecision, PendingFrames, TransmissionGate};
pub use latency::LatencyTracker;
pub use quality::{QualityPolicy, dynamic_quality};
pub use rate::{LatencyBand, RateChange, RateController, RateState};
pub use service::{DisplayFrame, StreamCommand, StreamEvent, StreamHandle, StreamService};
pub use stats::{LagLevel, StreamStats};
pub use types::{CaptureSession, DisplaySource, Facing, FailsafeState, Resolution};
