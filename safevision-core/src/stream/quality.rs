//! Encode quality under load. Derived per accepted tick, never stored.

/// Quality reductions, checked in order; the first match wins.
#[derive(Debug, Clone, PartialEq)]
pub struct QualityPolicy {
    pub heavy_pending: u32,
    pub heavy_reduction: f32,
    pub heavy_floor: f32,
    pub moderate_pending: u32,
    pub moderate_reduction: f32,
    pub moderate_floor: f32,
    pub slow_latency_ms: f64,
    pub slow_reduction: f32,
    pub slow_floor: f32,
}

impl Default for QualityPolicy {
    fn default() -> Self {
        Self {
            heavy_pending: 2,
            heavy_reduction: 0.3,
            heavy_floor: 0.3,
            moderate_pending: 1,
            moderate_reduction: 0.2,
            moderate_floor: 0.5,
            slow_latency_ms: 1000.0,
            slow_reduction: 0.2,
            slow_floor: 0.4,
        }
    }
}

/// Quality for the next frame given the base quality, the pending count and
/// the average latency. Always in `[0, 1]`.
///
/// The floors apply to the reduced value, so a base below a floor is raised
/// to that floor under load.
pub fn dynamic_quality(base: f32, pending: u32, avg_latency_ms: f64, policy: &QualityPolicy) -> f32 {
    let q = if pending > policy.heavy_pending {
        (base - policy.heavy_reduction).max(policy.heavy_floor)
    } else if pending > policy.moderate_pending {
        (base - policy.moderate_reduction).max(policy.moderate_floor)
    } else if avg_latency_ms > policy.slow_latency_ms {
        (base - policy.slow_reduction).max(policy.slow_floor)
    } else {
        base
    };
    if q.is_nan() { 0.0 } else { q.clamp(0.0, 1.0) }
}
