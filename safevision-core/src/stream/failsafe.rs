//! Fallback to local display when the processor goes quiet.
//!
//! ```text
//!   Normal ──(no success for `timeout`)──► Fallback
//!     ▲                                       │
//!     └──────────(next successful result)─────┘
//! ```

use tracing::{info, warn};

use crate::stream::timer::Deadline;
use crate::stream::types::FailsafeState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailsafeTransition {
    Engaged { silent_ms: u64 },
    Recovered { after_ms: u64 },
}

#[derive(Debug, Clone)]
pub struct FailsafeMonitor {
    state: FailsafeState,
    timeout_ms: u64,
    deadline: Deadline,
    /// Start of the current silence (last success or arm time).
    quiet_since: Option<u64>,
    engaged_at: Option<u64>,
}

impl FailsafeMonitor {
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            state: FailsafeState::Normal,
            timeout_ms,
            deadline: Deadline::idle(),
            quiet_since: None,
            engaged_at: None,
        }
    }

    pub fn state(&self) -> FailsafeState {
        self.state
    }

    pub fn is_fallback(&self) -> bool {
        self.state == FailsafeState::Fallback
    }

    pub fn deadline(&self) -> &Deadline {
        &self.deadline
    }

    /// Start watching from `now`. No-op in fallback, where only a success
    /// changes anything.
    pub fn arm(&mut self, now: u64) {
        if self.is_fallback() {
            return;
        }
        self.quiet_since = Some(now);
        self.deadline.arm_in(now, self.timeout_ms);
    }

    /// A good result arrived. Returns `Recovered` when leaving fallback.
    pub fn on_success(&mut self, now: u64) -> Option<FailsafeTransition> {
        let transition = match (self.state, self.engaged_at) {
            (FailsafeState::Fallback, engaged_at) => {
                let after_ms = engaged_at.map_or(0, |at| now.saturating_sub(at));
                info!(after_ms, "processor responding again, leaving fallback");
                Some(FailsafeTransition::Recovered { after_ms })
            }
            _ => None,
        };
        self.state = FailsafeState::Normal;
        self.engaged_at = None;
        self.quiet_since = Some(now);
        self.deadline.arm_in(now, self.timeout_ms);
        transition
    }

    /// Check the deadline. Engages fallback exactly once per silence.
    pub fn poll(&mut self, now: u64) -> Option<FailsafeTransition> {
        if !self.deadline.fire(now) || self.is_fallback() {
            return None;
        }
        let silent_ms = self.quiet_since.map_or(self.timeout_ms, |t| now.saturating_sub(t));
        self.state = FailsafeState::Fallback;
        self.engaged_at = Some(now);
        warn!(silent_ms, "no processed frames, falling back to local display");
        Some(FailsafeTransition::Engaged { silent_ms })
    }

    /// Stop watching without changing state.
    pub fn cancel(&mut self) {
        self.deadline.cancel();
    }

    /// Back to `Normal`, disarmed.
    pub fn reset(&mut self) {
        self.state = FailsafeState::Normal;
        self.deadline.cancel();
        self.quiet_since = None;
        self.engaged_at = None;
    }
}
