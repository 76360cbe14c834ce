pub mod linalg;

pub use linalg::*;

use serde::{Deserialize, Serialize};

/// One synchronized inertial callback: user acceleration (g, gravity removed)
/// in a gravity-aligned frame with z vertical, and rotation rate (rad/s).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SensorSample {
    pub timestamp: f64,
    pub accel: (f64, f64, f64),
    pub rotation: (f64, f64, f64),
}

impl SensorSample {
    pub fn new(timestamp: f64, accel: (f64, f64, f64), rotation: (f64, f64, f64)) -> Self {
        Self {
            timestamp,
            accel,
            rotation,
        }
    }

    pub fn accel_magnitude(&self) -> f64 {
        let (x, y, z) = self.accel;
        (x * x + y * y + z * z).sqrt()
    }

    pub fn rotation_magnitude(&self) -> f64 {
        let (x, y, z) = self.rotation;
        (x * x + y * y + z * z).sqrt()
    }
}

/// Position fix from the location provider. Negative speed or accuracy means
/// the provider had no valid value.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    pub timestamp: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub horizontal_accuracy: f64,
    pub vertical_accuracy: f64,
    pub speed: f64,
    pub course: f64,
}

impl LocationFix {
    pub fn has_valid_speed(&self) -> bool {
        self.speed.is_finite() && self.speed >= 0.0
    }

    pub fn has_valid_altitude(&self) -> bool {
        self.altitude.is_finite() && self.vertical_accuracy > 0.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BarometerSample {
    pub timestamp: f64,
    /// Altitude relative to the session start, in meters
    pub relative_altitude: f64,
    pub pressure_hpa: f64,
}

/// Ground surface under foot
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerrainType {
    Pavement,
    Gravel,
    Trail,
    Grass,
    Sand,
    Snow,
    Mud,
}

impl TerrainType {
    pub const ALL: [TerrainType; 7] = [
        TerrainType::Pavement,
        TerrainType::Gravel,
        TerrainType::Trail,
        TerrainType::Grass,
        TerrainType::Sand,
        TerrainType::Snow,
        TerrainType::Mud,
    ];

    /// Walking energy cost relative to a paved surface
    pub fn base_factor(&self) -> f64 {
        match self {
            TerrainType::Pavement => 1.0,
            TerrainType::Gravel => 1.1,
            TerrainType::Trail => 1.2,
            TerrainType::Grass => 1.15,
            TerrainType::Sand => 1.6,
            TerrainType::Snow => 1.5,
            TerrainType::Mud => 1.4,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TerrainType::Pavement => "pavement",
            TerrainType::Gravel => "gravel",
            TerrainType::Trail => "trail",
            TerrainType::Grass => "grass",
            TerrainType::Sand => "sand",
            TerrainType::Snow => "snow",
            TerrainType::Mud => "mud",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    MotionSignature,
    ContextHint,
    Fused,
    Manual,
    Default,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TerrainClassification {
    pub terrain: TerrainType,
    pub confidence: f64,
    pub timestamp: f64,
    pub method: DetectionMethod,
    pub manual_override: bool,
}

impl TerrainClassification {
    pub fn new(terrain: TerrainType, confidence: f64, timestamp: f64, method: DetectionMethod) -> Self {
        Self {
            terrain,
            confidence: clamp_unit(confidence),
            timestamp,
            method,
            manual_override: false,
        }
    }

    pub fn manual(terrain: TerrainType, timestamp: f64) -> Self {
        Self {
            terrain,
            confidence: 1.0,
            timestamp,
            method: DetectionMethod::Manual,
            manual_override: true,
        }
    }
}

/// Lower-trust terrain suggestion from outside the motion pipeline (map data etc.)
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContextHint {
    pub terrain: TerrainType,
    pub confidence: f64,
}

/// Clamp to [0, 1], mapping NaN to 0
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
