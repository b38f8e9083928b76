//! Per-tick send / drop decision.

/// Frames sent and not yet answered. Never negative.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingFrames(u32);

impl PendingFrames {
    pub fn count(&self) -> u32 {
        self.0
    }

    pub fn in_flight(&self) -> bool {
        self.0 > 0
    }

    pub fn increment(&mut self) {
        self.0 = self.0.saturating_add(1);
    }

    /// Returns `false` if nothing was pending.
    pub fn decrement(&mut self) -> bool {
        if self.0 == 0 {
            return false;
        }
        self.0 -= 1;
        true
    }

    /// Zero the count and return what was written off.
    pub fn clear(&mut self) -> u32 {
        std::mem::take(&mut self.0)
    }

    #[cfg(test)]
    pub(crate) fn set(&mut self, n: u32) {
        self.0 = n;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Send,
    /// Too many frames pending. Counts as a drop and penalizes the rate.
    Drop,
    /// Pipeline busy. Counts as a drop, no penalty.
    SoftDrop,
}

#[derive(Debug, Clone, Copy)]
pub struct TransmissionGate {
    drop_threshold: u32,
}

impl TransmissionGate {
    pub fn new(drop_threshold: u32) -> Self {
        Self { drop_threshold }
    }

    /// `probe_only` limits the pipeline to one frame in flight.
    pub fn decide(&self, pending: PendingFrames, probe_only: bool) -> GateDecision {
        if pending.count() > self.drop_threshold {
            GateDecision::Drop
        } else if pending.in_flight() && (pending.count() > 1 || probe_only) {
            GateDecision::SoftDrop
        } else {
            GateDecision::Send
        }
    }
}

impl Default for TransmissionGate {
    fn default() -> Self {
        Self::new(3)
    }
}
