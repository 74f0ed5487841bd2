//! Fatigue and stress index fusion
//!
//! Maps a fused feature vector to two 0-100 scores through fixed weighted sums.
//! Components are clamped to 0-1 before weighting, except the yawn rate, which
//! is only floored at 0 so bursts above the ceiling still dominate fatigue.
//! Each weight set sums to 1.0 and the final score is clamped to 0-100.

use crate::types::{FusedFeatures, Indices};

/// Yawn rate (per minute) that maps to a normalized component of 1.0; not a cap
pub const YAWN_RATE_CEILING: f64 = 6.0;

/// Fatigue weights
const FATIGUE_PERCLOS: f64 = 0.45;
const FATIGUE_YAWN: f64 = 0.20;
const FATIGUE_BLINK_VAR: f64 = 0.10;
const FATIGUE_NEAR_WORK: f64 = 0.10;
const FATIGUE_POSTURE: f64 = 0.15;

/// Stress weights
const STRESS_TENSION: f64 = 0.30;
const STRESS_GAZE_OFF: f64 = 0.20;
const STRESS_HEAD_VAR: f64 = 0.20;
const STRESS_POSTURE: f64 = 0.20;
const STRESS_NEAR_WORK: f64 = 0.10;

/// Stateless index fuser
pub struct IndexFuser;

impl IndexFuser {
    /// Compute fatigue and stress from fused features
    pub fn compute(fused: &FusedFeatures) -> Indices {
        let perclos = clamp01(fused.perclos);
        let yawn = non_negative(fused.yawn_rate_min / YAWN_RATE_CEILING);
        let posture = clamp01(fused.posture_angle_norm);
        let head_var = clamp01(fused.headpose_var);
        let gaze_off = clamp01(1.0 - fused.gaze_on_pct);
        let near_work = clamp01(fused.near_work);
        let tension = clamp01(fused.facial_tension);
        let blink_var = clamp01(fused.blink_var);

        let fatigue = FATIGUE_PERCLOS * perclos
            + FATIGUE_YAWN * yawn
            + FATIGUE_BLINK_VAR * blink_var
            + FATIGUE_NEAR_WORK * near_work
            + FATIGUE_POSTURE * posture;

        let stress = STRESS_TENSION * tension
            + STRESS_GAZE_OFF * gaze_off
            + STRESS_HEAD_VAR * head_var
            + STRESS_POSTURE * posture
            + STRESS_NEAR_WORK * near_work;

        Indices {
            fatigue: to_score(fatigue),
            stress: to_score(stress),
        }
    }
}

/// Clamp to 0-1, mapping NaN to 0 so it cannot reach a score
fn clamp01(x: f64) -> f64 {
    if x.is_nan() {
        return 0.0;
    }
    x.clamp(0.0, 1.0)
}

fn non_negative(x: f64) -> f64 {
    if x.is_nan() {
        return 0.0;
    }
    x.max(0.0)
}

fn to_score(weighted: f64) -> f64 {
    (100.0 * clamp01(weighted)).clamp(0.0, 100.0)
}
