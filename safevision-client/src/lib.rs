//! # safevision-client: SafeVision camera client
//!
//! Streams camera frames to a remote processor through the adaptive
//! controller in `safevision-core`, falls back to the local view when the
//! processor goes quiet, and optionally drives a recording service over
//! HTTP.
//!
//! ## Modes
//!
//! - **TCP**: stream to the processor at `network.processor_address`
//!   (or `--processor`).
//! - **Loopback**: stream to an in-process processor (`--loopback`).

pub mod app;
pub mod config;
pub mod recording;
