//! Reference motion envelopes per terrain type
//!
//! Units follow `MotionFeatures`: Hz, g², g, unitless, (rad/s)², g per frame,
//! fraction of step-band power.

use serde::{Deserialize, Serialize};

use super::features::MotionFeatures;
use crate::types::TerrainType;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeatureRange {
    pub min: f64,
    pub max: f64,
}

impl FeatureRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn midpoint(&self) -> f64 {
        0.5 * (self.min + self.max)
    }

    /// 1.0 at the midpoint, falling linearly to 0.0 at either boundary
    pub fn score(&self, value: f64) -> f64 {
        if !value.is_finite() {
            return 0.0;
        }
        let half = 0.5 * (self.max - self.min);
        if half <= 0.0 {
            return if value == self.min { 1.0 } else { 0.0 };
        }
        (1.0 - (value - self.midpoint()).abs() / half).max(0.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TerrainSignature {
    pub terrain: TerrainType,
    pub step_frequency: FeatureRange,
    pub accel_variance: FeatureRange,
    pub vertical_accel: FeatureRange,
    pub step_regularity: FeatureRange,
    pub rotation_variance: FeatureRange,
    pub impact_intensity: FeatureRange,
    pub band_power: [FeatureRange; 4],
}

pub const WEIGHT_STEP_FREQUENCY: f64 = 0.25;
pub const WEIGHT_ACCEL_VARIANCE: f64 = 0.20;
pub const WEIGHT_VERTICAL: f64 = 0.15;
pub const WEIGHT_REGULARITY: f64 = 0.15;
pub const WEIGHT_ROTATION: f64 = 0.10;
pub const WEIGHT_IMPACT: f64 = 0.10;
pub const WEIGHT_BAND_PROFILE: f64 = 0.05;

impl TerrainSignature {
    /// Weighted similarity of a feature vector to this envelope, in [0, 1]
    pub fn score(&self, features: &MotionFeatures) -> f64 {
        let band = self
            .band_power
            .iter()
            .zip(features.band_power.iter())
            .map(|(range, value)| range.score(*value))
            .sum::<f64>()
            / self.band_power.len() as f64;

        let total = WEIGHT_STEP_FREQUENCY * self.step_frequency.score(features.step_frequency_hz)
            + WEIGHT_ACCEL_VARIANCE * self.accel_variance.score(features.accel_variance)
            + WEIGHT_VERTICAL * self.vertical_accel.score(features.vertical_accel)
            + WEIGHT_REGULARITY * self.step_regularity.score(features.step_regularity)
            + WEIGHT_ROTATION * self.rotation_variance.score(features.rotation_variance)
            + WEIGHT_IMPACT * self.impact_intensity.score(features.impact_intensity)
            + WEIGHT_BAND_PROFILE * band;
        total.clamp(0.0, 1.0)
    }

    /// The feature vector sitting at the centre of every range
    pub fn midpoint_features(&self) -> MotionFeatures {
        MotionFeatures {
            step_frequency_hz: self.step_frequency.midpoint(),
            accel_variance: self.accel_variance.midpoint(),
            vertical_accel: self.vertical_accel.midpoint(),
            step_regularity: self.step_regularity.midpoint(),
            rotation_variance: self.rotation_variance.midpoint(),
            impact_intensity: self.impact_intensity.midpoint(),
            band_power: [
                self.band_power[0].midpoint(),
                self.band_power[1].midpoint(),
                self.band_power[2].midpoint(),
                self.band_power[3].midpoint(),
            ],
        }
    }
}

const fn r(min: f64, max: f64) -> FeatureRange {
    FeatureRange::new(min, max)
}

pub static REFERENCE_SIGNATURES: [TerrainSignature; 7] = [
    TerrainSignature {
        terrain: TerrainType::Pavement,
        step_frequency: r(1.7, 2.1),
        accel_variance: r(0.02, 0.08),
        vertical_accel: r(0.10, 0.25),
        step_regularity: r(0.80, 1.00),
        rotation_variance: r(0.05, 0.25),
        impact_intensity: r(0.04, 0.10),
        band_power: [r(0.05, 0.25), r(0.45, 0.85), r(0.05, 0.25), r(0.0, 0.15)],
    },
    TerrainSignature {
        terrain: TerrainType::Gravel,
        step_frequency: r(1.6, 2.0),
        accel_variance: r(0.04, 0.12),
        vertical_accel: r(0.12, 0.28),
        step_regularity: r(0.70, 0.90),
        rotation_variance: r(0.10, 0.40),
        impact_intensity: r(0.06, 0.14),
        band_power: [r(0.05, 0.25), r(0.35, 0.70), r(0.10, 0.30), r(0.05, 0.25)],
    },
    TerrainSignature {
        terrain: TerrainType::Trail,
        step_frequency: r(1.4, 1.9),
        accel_variance: r(0.05, 0.16),
        vertical_accel: r(0.12, 0.32),
        step_regularity: r(0.55, 0.85),
        rotation_variance: r(0.20, 0.70),
        impact_intensity: r(0.06, 0.16),
        band_power: [r(0.10, 0.35), r(0.30, 0.60), r(0.10, 0.30), r(0.05, 0.20)],
    },
    TerrainSignature {
        terrain: TerrainType::Grass,
        step_frequency: r(1.5, 1.9),
        accel_variance: r(0.02, 0.07),
        vertical_accel: r(0.08, 0.20),
        step_regularity: r(0.70, 0.92),
        rotation_variance: r(0.08, 0.30),
        impact_intensity: r(0.03, 0.08),
        band_power: [r(0.10, 0.30), r(0.40, 0.75), r(0.05, 0.20), r(0.0, 0.10)],
    },
    TerrainSignature {
        terrain: TerrainType::Sand,
        step_frequency: r(1.1, 1.6),
        accel_variance: r(0.03, 0.10),
        vertical_accel: r(0.10, 0.26),
        step_regularity: r(0.50, 0.80),
        rotation_variance: r(0.15, 0.50),
        impact_intensity: r(0.02, 0.07),
        band_power: [r(0.25, 0.55), r(0.20, 0.45), r(0.05, 0.20), r(0.0, 0.10)],
    },
    TerrainSignature {
        terrain: TerrainType::Snow,
        step_frequency: r(1.2, 1.7),
        accel_variance: r(0.04, 0.12),
        vertical_accel: r(0.14, 0.32),
        step_regularity: r(0.55, 0.85),
        rotation_variance: r(0.15, 0.55),
        impact_intensity: r(0.04, 0.10),
        band_power: [r(0.20, 0.50), r(0.25, 0.50), r(0.05, 0.25), r(0.0, 0.15)],
    },
    TerrainSignature {
        terrain: TerrainType::Mud,
        step_frequency: r(1.0, 1.5),
        accel_variance: r(0.05, 0.15),
        vertical_accel: r(0.10, 0.30),
        step_regularity: r(0.40, 0.75),
        rotation_variance: r(0.20, 0.60),
        impact_intensity: r(0.03, 0.09),
        band_power: [r(0.25, 0.60), r(0.15, 0.40), r(0.10, 0.25), r(0.0, 0.15)],
    },
];

/// Best-matching terrain and its score, plus every candidate's score
pub fn match_features(features: &MotionFeatures, signatures: &[TerrainSignature]) -> (TerrainType, f64, Vec<(TerrainType, f64)>) {
    let scores: Vec<(TerrainType, f64)> = signatures
        .iter()
        .map(|sig| (sig.terrain, sig.score(features)))
        .collect();

    let (terrain, best) = scores
        .iter()
        .copied()
        .fold((TerrainType::Pavement, f64::NEG_INFINITY), |acc, (t, s)| {
            if s > acc.1 {
                (t, s)
            } else {
                acc
            }
        });

    (terrain, best.max(0.0), scores)
}
