//! Cancellable deadlines on the controller's millisecond clock.
//!
//! A [`Deadline`] is plain data: the controller arms and cancels it, and the
//! driving loop sleeps until the earliest armed one. Nothing fires by itself,
//! so dropping or cancelling a deadline can never leave a callback behind.

/// An optional point in time, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Deadline {
    at: Option<u64>,
}

impl Deadline {
    pub const fn idle() -> Self {
        Self { at: None }
    }

    /// Arm (or re-arm) for `at`.
    pub fn arm_at(&mut self, at: u64) {
        self.at = Some(at);
    }

    /// Arm for `now + delay_ms`.
    pub fn arm_in(&mut self, now: u64, delay_ms: u64) {
        self.arm_at(now.saturating_add(delay_ms));
    }

    /// Arm for `now + delay_ms` unless already armed. Returns `true` if armed here.
    pub fn arm_if_idle(&mut self, now: u64, delay_ms: u64) -> bool {
        if self.at.is_some() {
            return false;
        }
        self.arm_in(now, delay_ms);
        true
    }

    pub fn cancel(&mut self) {
        self.at = None;
    }

    pub fn is_armed(&self) -> bool {
        self.at.is_some()
    }

    pub fn at(&self) -> Option<u64> {
        self.at
    }

    pub fn is_due(&self, now: u64) -> bool {
        matches!(self.at, Some(at) if now >= at)
    }

    /// Disarm and return `true` if due at `now`.
    pub fn fire(&mut self, now: u64) -> bool {
        if self.is_due(now) {
            self.at = None;
            true
        } else {
            false
        }
    }

    pub fn remaining(&self, now: u64) -> Option<u64> {
        self.at.map(|at| at.saturating_sub(now))
    }
}

/// Earliest armed deadline among `deadlines`.
pub fn earliest<'a>(deadlines: impl IntoIterator<Item = &'a Deadline>) -> Option<u64> {
    deadlines.into_iter().filter_map(Deadline::at).min()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_once_when_due() {
        let mut d = Deadline::idle();
        d.arm_in(1_000, 500);
        assert!(!d.fire(1_499));
        assert!(d.fire(1_500));
        assert!(!d.fire(1_501));
        assert!(!d.is_armed());
    }

    #[test]
    fn arm_if_idle_keeps_existing_deadline() {
        let mut d = Deadline::idle();
        assert!(d.arm_if_idle(0, 5_000));
        assert!(!d.arm_if_idle(3_000, 5_000));
        assert_eq!(d.at(), Some(5_000));
    }

    #[test]
    fn cancelled_deadline_never_fires() {
        let mut d = Deadline::idle();
        d.arm_at(10);
        d.cancel();
        assert!(!d.fire(u64::MAX));
        assert_eq!(d.remaining(0), None);
    }

    #[test]
    fn earliest_skips_idle() {
        let mut a = Deadline::idle();
        let mut b = Deadline::idle();
        let c = Deadline::idle();
        a.arm_at(900);
        b.arm_at(300);
        assert_eq!(earliest([&a, &b, &c]), Some(300));
        assert_eq!(earliest([&c]), None);
    }
}
