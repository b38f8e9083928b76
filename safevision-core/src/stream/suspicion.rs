use crate::protocol::AnalysisResult;

const RAISE: u8 = 5;
const DECAY: u8 = 1;
const MAX: u8 = 100;

/// Rolling 0–100 confidence that suspicious behaviour is going on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SuspicionMeter {
    level: u8,
}

impl SuspicionMeter {
    pub fn level(&self) -> u8 {
        self.level
    }

    /// +5 when behaviour was detected, -1 otherwise.
    pub fn observe(&mut self, analysis: &AnalysisResult) -> u8 {
        self.level = if analysis.behavior_detected {
            self.level.saturating_add(RAISE).min(MAX)
        } else {
            self.level.saturating_sub(DECAY)
        };
        self.level
    }

    pub fn reset(&mut self) {
        self.level = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analysis(detected: bool) -> AnalysisResult {
        AnalysisResult {
            people_count: 1,
            behaviors: Vec::new(),
            behavior_detected: detected,
        }
    }

    #[test]
    fn rises_and_decays_within_bounds() {
        let mut meter = SuspicionMeter::default();
        assert_eq!(meter.observe(&analysis(false)), 0);
        assert_eq!(meter.observe(&analysis(true)), 5);
        assert_eq!(meter.observe(&analysis(false)), 4);

        for _ in 0..30 {
            meter.observe(&analysis(true));
        }
        assert_eq!(meter.level(), 100);
    }
}
