use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::health_monitor::HealthReport;
use crate::sampling::{MovementPattern, SamplingPreset};
use crate::types::{DetectionMethod, TerrainType};

/// Point-in-time view of a session for dashboards and debug logs
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySummary {
    /// Wall-clock time the summary was taken, RFC 3339
    pub generated_at: String,
    /// Latest sensor timestamp seen by the session [s]
    pub sensor_time: f64,

    pub inertial_samples: u64,
    pub location_fixes: u64,
    pub barometer_samples: u64,

    // Altitude / grade
    pub altitude_m: f64,
    pub altitude_uncertainty: f64,
    pub altitude_quality: f64,
    pub altitude_measurements: u64,
    /// Set by a surveyed calibration [hPa]
    pub reference_pressure_hpa: Option<f64>,
    pub grade_percent: f64,
    pub grade_confidence: f64,
    pub elevation_gain_m: f64,
    pub elevation_loss_m: f64,

    // Position
    pub distance_m: f64,
    pub speed_mps: f64,

    // Terrain
    pub terrain: Option<TerrainType>,
    pub terrain_confidence: f64,
    pub terrain_factor: f64,
    pub detection_method: Option<DetectionMethod>,
    pub manual_override: bool,

    // Sampling
    pub sampling_preset: SamplingPreset,
    pub movement_pattern: MovementPattern,
    /// Modelled, not measured [% battery per hour]
    pub estimated_drain_pct_per_hour: f64,

    pub health: HealthReport,
}

impl TelemetrySummary {
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// One-line status for logs
    pub fn describe(&self) -> String {
        let terrain = match self.terrain {
            Some(t) if self.manual_override => format!("{} (manual)", t.name()),
            Some(t) => format!("{} {:.0}%", t.name(), self.terrain_confidence * 100.0),
            None => "unknown".to_string(),
        };
        let baro = if self.health.barometer_usable() { "baro" } else { "gps-alt" };
        format!(
            "[{:>7.1}s] {:.0} m ±{:.1} ({}) | grade {:+.1}% ↑{:.0} ↓{:.0} | {:.0} m @ {:.1} m/s | {} ×{:.2} | {:?}/{:?} ~{:.1}%/h",
            self.sensor_time,
            self.altitude_m,
            self.altitude_uncertainty.sqrt(),
            baro,
            self.grade_percent,
            self.elevation_gain_m,
            self.elevation_loss_m,
            self.distance_m,
            self.speed_mps,
            terrain,
            self.terrain_factor,
            self.movement_pattern,
            self.sampling_preset,
            self.estimated_drain_pct_per_hour,
        )
    }
}

pub fn wall_clock_now() -> String {
    chrono::Utc::now().to_rfc3339()
}
