//! Camera access.
//!
//! [`CaptureDevice`] is the seam between the stream service and a real
//! camera. [`SyntheticCamera`] generates deterministic frames so the client
//! runs (and is tested) without hardware.

use async_trait::async_trait;
use tracing::debug;

use crate::error::DeviceError;
use crate::stream::types::{Facing, Resolution};

#[async_trait]
pub trait CaptureDevice: Send {
    /// Open the camera. Fails with a terminal [`DeviceError`].
    async fn request_stream(
        &mut self,
        facing: Facing,
        resolution: Resolution,
    ) -> Result<(), DeviceError>;

    /// Reopen on the other camera and return its facing.
    async fn switch_facing(&mut self) -> Result<Facing, DeviceError>;

    /// Capture one frame encoded at `quality` in `[0, 1]`.
    async fn grab_frame(&mut self, quality: f32) -> Result<Vec<u8>, DeviceError>;

    /// Close the camera. Idempotent.
    async fn release(&mut self);
}

/// Frame header written by [`SyntheticCamera`].
pub const SYNTHETIC_MAGIC: [u8; 2] = *b"SC";

/// Generates frames whose size scales with resolution and quality.
#[derive(Debug, Clone)]
pub struct SyntheticCamera {
    has_front: bool,
    has_rear: bool,
    refuse: Option<DeviceError>,
    open: Option<(Facing, Resolution)>,
    frames: u64,
}

impl SyntheticCamera {
    pub fn new() -> Self {
        Self {
            has_front: true,
            has_rear: true,
            refuse: None,
            open: None,
            frames: 0,
        }
    }

    /// A camera with only one facing available.
    pub fn single(facing: Facing) -> Self {
        Self {
            has_front: facing == Facing::Front,
            has_rear: facing == Facing::Rear,
            ..Self::new()
        }
    }

    /// A camera whose every `request_stream` fails with `error`.
    pub fn refusing(error: DeviceError) -> Self {
        Self {
            refuse: Some(error),
            ..Self::new()
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    pub fn frames_grabbed(&self) -> u64 {
        self.frames
    }

    fn has(&self, facing: Facing) -> bool {
        match facing {
            Facing::Front => self.has_front,
            Facing::Rear => self.has_rear,
        }
    }
}

impl Default for SyntheticCamera {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CaptureDevice for SyntheticCamera {
    async fn request_stream(
        &mut self,
        facing: Facing,
        resolution: Resolution,
    ) -> Result<(), DeviceError> {
        if let Some(err) = &self.refuse {
            return Err(err.clone());
        }
        if !self.has(facing) {
            return Err(DeviceError::NotFound);
        }
        debug!(%facing, %resolution, "synthetic camera opened");
        self.open = Some((facing, resolution));
        Ok(())
    }

    async fn switch_facing(&mut self) -> Result<Facing, DeviceError> {
        let (facing, resolution) = self
            .open
            .ok_or_else(|| DeviceError::Failed("camera not open".to_string()))?;
        let next = facing.flipped();
        self.request_stream(next, resolution).await?;
        Ok(next)
    }

    async fn grab_frame(&mut self, quality: f32) -> Result<Vec<u8>, DeviceError> {
        let (facing, resolution) = self
            .open
            .ok_or_else(|| DeviceError::Failed("camera not open".to_string()))?;

        let pixels = resolution.width as usize * resolution.height as usize;
        let body = ((pixels / 64) as f32 * quality.clamp(0.05, 1.0)) as usize;

        let mut frame = Vec::with_capacity(12 + body);
        frame.extend_from_slice(&SYNTHETIC_MAGIC);
        frame.push(matches!(facing, Facing::Rear) as u8);
        frame.push((quality.clamp(0.0, 1.0) * 100.0) as u8);
        frame.extend_from_slice(&self.frames.to_le_bytes());
        let seed = self.frames as u8;
        frame.extend((0..body).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)));

        self.frames += 1;
        Ok(frame)
    }

    async fn release(&mut self) {
        if self.open.take().is_some() {
            debug!("synthetic camera released");
        }
    }
}
