//! Configuration for the camera client.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use safevision_core::stream::{LatencyBands, RecoveryRule};
use safevision_core::{
    AdaptationConfig, Facing, LoopbackConfig, Resolution, StreamSettings, TcpTransportConfig,
};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub network: NetworkConfig,
    pub camera: CameraConfig,
    pub adaptive: AdaptiveConfig,
    pub failsafe: FailsafeConfig,
    pub recording: RecordingConfig,
    pub logging: LoggingConfig,
}

/// Link to the processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// `host:port` of the frame processor.
    pub processor_address: String,
    pub connect_timeout_ms: u64,
    /// Failed dials in a row before giving up; 0 retries forever.
    pub reconnect_attempts: u32,
    pub reconnect_delay_ms: u64,
    pub heartbeat_interval_ms: u64,
    /// Simulated processing delay when running against the loopback processor.
    pub loopback_latency_ms: u64,
}

/// Capture settings applied at session start.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// `"front"` (user) or `"rear"` (environment).
    pub facing: Facing,
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
    pub min_frame_rate: f64,
    pub max_frame_rate: f64,
    /// Base encode quality, 0.0 – 1.0.
    pub video_quality: f32,
}

/// Latency-driven rate adaptation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveConfig {
    pub enabled: bool,
    /// Pending frames above which a capture tick is dropped.
    pub drop_threshold: u32,
    pub poll_interval_ms: u64,
    /// Latency samples kept for the moving average.
    pub window_size: usize,
    pub severe_latency_ms: f64,
    pub high_latency_ms: f64,
    pub good_latency_ms: f64,
    pub fast_latency_ms: f64,
    pub recovery_step: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FailsafeConfig {
    /// Silence before falling back to the local camera view.
    pub timeout_ms: u64,
    /// In-flight time before a stall warning.
    pub stall_warning_ms: u64,
    /// Keep a single probe frame in flight while in fallback.
    pub pause_sending: bool,
}

/// Recording collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    pub enabled: bool,
    /// Base URL of the recording API, without the `/api/recording` suffix.
    pub base_url: String,
    pub session_id: String,
    pub request_timeout_ms: u64,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `"info"` or `"safevision_core=debug"`.
    /// `RUST_LOG` takes precedence.
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            processor_address: "127.0.0.1:9750".into(),
            connect_timeout_ms: 5_000,
            reconnect_attempts: 10,
            reconnect_delay_ms: 2_000,
            heartbeat_interval_ms: 5_000,
            loopback_latency_ms: 150,
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            facing: Facing::Front,
            width: 640,
            height: 480,
            frame_rate: 10.0,
            min_frame_rate: 1.0,
            max_frame_rate: 30.0,
            video_quality: 0.8,
        }
    }
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        let bands = LatencyBands::default();
        Self {
            enabled: true,
            drop_threshold: 3,
            poll_interval_ms: 100,
            window_size: 10,
            severe_latency_ms: bands.severe_above_ms,
            high_latency_ms: bands.high_above_ms,
            good_latency_ms: bands.good_below_ms,
            fast_latency_ms: bands.fast_below_ms,
            recovery_step: RecoveryRule::default().step,
        }
    }
}

impl Default for FailsafeConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            stall_warning_ms: 5_000,
            pause_sending: false,
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: "http://127.0.0.1:5000".into(),
            session_id: "default".into(),
            request_timeout_ms: 5_000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl ClientConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Write the default configuration to a file.
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = Self::default().to_toml().map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    /// Camera settings, clamped into ranges the controller accepts.
    pub fn to_stream_settings(&self) -> StreamSettings {
        let cam = &self.camera;
        let min = finite_or(cam.min_frame_rate, 1.0).clamp(0.1, 60.0);
        let max = finite_or(cam.max_frame_rate, 30.0).clamp(min, 60.0);
        let quality = if cam.video_quality.is_finite() {
            cam.video_quality.clamp(0.0, 1.0)
        } else {
            0.8
        };

        StreamSettings {
            frame_rate: finite_or(cam.frame_rate, 10.0).clamp(min, max),
            min_frame_rate: min,
            max_frame_rate: max,
            video_quality: quality,
            resolution: Resolution::new(cam.width.clamp(16, 7680), cam.height.clamp(16, 4320)),
            facing: cam.facing,
            adaptive_enabled: self.adaptive.enabled,
        }
    }

    /// Adaptation tuning, clamped so `AdaptationConfig::validate` passes.
    pub fn to_adaptation_config(&self) -> AdaptationConfig {
        let defaults = AdaptationConfig::default();
        let ad = &self.adaptive;
        let recovery = RecoveryRule {
            step: finite_or(ad.recovery_step, defaults.recovery.step).max(0.0),
            ..defaults.recovery.clone()
        };
        let window = ad.window_size.clamp(recovery.samples.max(defaults.min_samples), 100);

        AdaptationConfig {
            poll_interval: Duration::from_millis(ad.poll_interval_ms.clamp(10, 1_000)),
            drop_threshold: ad.drop_threshold.max(1),
            window_capacity: window,
            bands: LatencyBands {
                severe_above_ms: finite_or(ad.severe_latency_ms, defaults.bands.severe_above_ms),
                high_above_ms: finite_or(ad.high_latency_ms, defaults.bands.high_above_ms),
                good_below_ms: finite_or(ad.good_latency_ms, defaults.bands.good_below_ms),
                fast_below_ms: finite_or(ad.fast_latency_ms, defaults.bands.fast_below_ms),
                ..defaults.bands.clone()
            },
            recovery,
            stall_timeout: Duration::from_millis(self.failsafe.stall_warning_ms.max(100)),
            failsafe_timeout: Duration::from_millis(self.failsafe.timeout_ms.max(100)),
            pause_sending_in_fallback: self.failsafe.pause_sending,
            ..defaults
        }
    }

    /// TCP transport settings; `address` overrides the configured processor.
    pub fn to_tcp_config(&self, address: Option<&str>) -> TcpTransportConfig {
        let net = &self.network;
        TcpTransportConfig {
            address: address.unwrap_or(&net.processor_address).to_string(),
            connect_timeout: Duration::from_millis(net.connect_timeout_ms.max(100)),
            reconnect_attempts: net.reconnect_attempts,
            reconnect_delay: Duration::from_millis(net.reconnect_delay_ms),
            heartbeat_interval: Duration::from_millis(net.heartbeat_interval_ms.max(100)),
            ..TcpTransportConfig::default()
        }
    }

    pub fn to_loopback_config(&self) -> LoopbackConfig {
        LoopbackConfig {
            latency: Duration::from_millis(self.network.loopback_latency_ms),
            ..LoopbackConfig::default()
        }
    }
}

fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() { value } else { fallback }
}

// ── Tests ────────────────────────────────────────────────────────
