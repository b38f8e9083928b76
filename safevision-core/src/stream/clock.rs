use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::time::Instant;

/// Millisecond clock shared by the controller and the service loop.
///
/// Readings are wall-clock milliseconds (suitable for `sent_timestamp`) but
/// advance with the tokio clock, so they never go backwards and follow
/// paused time in tests.
#[derive(Debug, Clone, Copy)]
pub struct StreamClock {
    origin: Instant,
    epoch_ms_at_origin: u64,
}

impl StreamClock {
    pub fn new() -> Self {
        let epoch_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self::with_epoch(epoch_ms)
    }

    /// A clock whose first reading is `epoch_ms`.
    pub fn with_epoch(epoch_ms: u64) -> Self {
        Self {
            origin: Instant::now(),
            epoch_ms_at_origin: epoch_ms,
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.epoch_ms_at_origin + self.origin.elapsed().as_millis() as u64
    }

    /// The tokio instant at which `now_ms()` reads `ms`.
    pub fn instant_at(&self, ms: u64) -> Instant {
        self.origin + Duration::from_millis(ms.saturating_sub(self.epoch_ms_at_origin))
    }
}

impl Default for StreamClock {
    fn default() -> Self {
        Self::new()
    }
}
