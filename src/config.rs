//! Every tunable of the tracking pipeline
//
// Each component takes its own section. All sections deserialize with
// `#[serde(default)]`, so a JSON file only needs the fields it overrides.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackerError};
use crate::sampling::SamplingPreset;
use crate::types::TerrainType;

// ─── Altitude estimator ──────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AltitudeConfig {
    /// Variance growth per second of the time update [m²/s]
    pub process_noise: f64,
    /// Base barometric measurement variance [m²]
    pub measurement_noise: f64,
    pub initial_uncertainty: f64,
    pub calibrated_uncertainty: f64,
    pub uncertainty_floor: f64,

    // ── Weather-front detection ──
    pub pressure_jump_hpa: f64,
    pub pressure_jump_noise_scale: f64,

    // ── Stability ──
    pub stability_window: usize,
    pub stability_std_scale: f64,
    pub stable_noise_reduction: f64,

    // ── GPS blending ──
    pub gps_window: usize,
    pub gps_min_samples: usize,
    pub gps_good_accuracy: f64,
    pub gps_disagreement_margin: f64,
    pub gps_blend_fraction: f64,
    pub gps_max_correction: f64,
    pub gps_inflation_per_meter: f64,

    // ── Quality assessment ──
    pub recency_horizon_secs: f64,
    pub gps_agreement_scale: f64,
}

impl Default for AltitudeConfig {
    fn default() -> Self {
        Self {
            process_noise: 0.05,
            measurement_noise: 1.0,
            initial_uncertainty: 100.0,
            calibrated_uncertainty: 0.25,
            uncertainty_floor: 1e-4,
            pressure_jump_hpa: 0.3,
            pressure_jump_noise_scale: 4.0,
            stability_window: 5,
            stability_std_scale: 1.0,
            stable_noise_reduction: 0.5,
            gps_window: 10,
            gps_min_samples: 5,
            gps_good_accuracy: 10.0,
            gps_disagreement_margin: 5.0,
            gps_blend_fraction: 0.1,
            gps_max_correction: 2.0,
            gps_inflation_per_meter: 0.5,
            recency_horizon_secs: 60.0,
            gps_agreement_scale: 20.0,
        }
    }
}

// ─── Position smoother ───────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SmootherConfig {
    /// Acceleration variance driving Q [deg²/s⁴]
    pub process_noise_coeff: f64,
    /// Fixed position measurement variance [deg²]
    pub measurement_noise: f64,
    pub initial_position_variance: f64,
    pub initial_velocity_variance: f64,
    pub meters_per_degree: f64,
    /// Scale longitudinal velocity by cos(latitude) before converting to m/s
    pub latitude_correction: bool,
    /// Longer gaps restart the filter from the next fix
    pub max_gap_secs: f64,
}

impl Default for SmootherConfig {
    fn default() -> Self {
        Self {
            process_noise_coeff: 2e-11,
            measurement_noise: 2e-9,
            initial_position_variance: 8e-9,
            initial_velocity_variance: 3.2e-10,
            meters_per_degree: 111_320.0,
            latitude_correction: true,
            max_gap_secs: 60.0,
        }
    }
}

// ─── Grade aggregator ────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GradeConfig {
    pub window_size: usize,
    pub min_confidence: f64,
    pub noise_gate_m: f64,
    pub min_segment_distance_m: f64,
    pub max_grade_percent: f64,
    /// (linear, quadratic) coefficients in |grade|/100
    pub ascent_coefficients: (f64, f64),
    pub descent_coefficients: (f64, f64),
}

impl Default for GradeConfig {
    fn default() -> Self {
        Self {
            window_size: 10,
            min_confidence: 0.5,
            noise_gate_m: 0.2,
            min_segment_distance_m: 1.0,
            max_grade_percent: 45.0,
            ascent_coefficients: (3.0, 9.0),
            descent_coefficients: (0.6, 4.0),
        }
    }
}

// ─── Motion classifier ───────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub buffer_capacity: usize,
    pub min_samples: usize,
    pub analysis_interval_secs: f64,
    pub min_step_hz: f64,
    pub max_step_hz: f64,
    pub autocorr_min_peak: f64,
    pub min_peak_interval_secs: f64,
    /// Magnitude std below this is treated as sensor noise [g]
    pub noise_floor_g: f64,
    pub smoother_window: usize,
    /// Five edges delimiting the four spectral bands [Hz]
    pub band_edges_hz: [f64; 5],
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 256,
            min_samples: 30,
            analysis_interval_secs: 1.0,
            min_step_hz: 0.5,
            max_step_hz: 4.0,
            autocorr_min_peak: 0.3,
            min_peak_interval_secs: 0.25,
            noise_floor_g: 0.02,
            smoother_window: 5,
            band_edges_hz: [0.5, 1.5, 2.5, 4.0, 8.0],
        }
    }
}

// ─── Terrain arbiter ─────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ArbiterConfig {
    pub high_confidence: f64,
    pub medium_confidence: f64,
    pub agreement_boost: f64,
    pub disagreement_penalty: f64,
    /// Multiplier applied to context-hint confidence before fusion
    pub hint_trust: f64,
    pub default_terrain: TerrainType,
    pub default_confidence: f64,
    pub history_capacity: usize,
    pub factor_change_threshold: f64,
    pub confidence_emit_threshold: f64,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            high_confidence: 0.7,
            medium_confidence: 0.55,
            agreement_boost: 0.1,
            disagreement_penalty: 0.15,
            hint_trust: 0.85,
            default_terrain: TerrainType::Pavement,
            default_confidence: 0.3,
            history_capacity: 100,
            factor_change_threshold: 0.02,
            confidence_emit_threshold: 0.8,
        }
    }
}

// ─── Sampling controller ─────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingControllerConfig {
    pub speed_window: usize,
    pub stationary_max_speed: f64,
    pub walking_max_speed: f64,
    pub jogging_max_speed: f64,
    pub min_reconfigure_interval_secs: f64,
    pub long_session_secs: f64,
    pub low_battery: f64,
    pub critical_battery: f64,
    pub ultra_low_battery: f64,
    /// Preset used when adaptive mode is off
    pub fixed_preset: SamplingPreset,
    pub terrain_precision_confidence: f64,
}

impl Default for SamplingControllerConfig {
    fn default() -> Self {
        Self {
            speed_window: 10,
            stationary_max_speed: 0.3,
            walking_max_speed: 2.0,
            jogging_max_speed: 3.5,
            min_reconfigure_interval_secs: 5.0,
            long_session_secs: 2.0 * 3600.0,
            low_battery: 0.2,
            critical_battery: 0.1,
            ultra_low_battery: 0.05,
            fixed_preset: SamplingPreset::Balanced,
            terrain_precision_confidence: 0.7,
        }
    }
}

// ─── Session ─────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub detection_interval_secs: f64,
    pub event_capacity: usize,
    pub feed_capacity: usize,
    pub inertial_silence_secs: f64,
    pub location_silence_secs: f64,
    pub barometer_silence_secs: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            detection_interval_secs: 2.0,
            event_capacity: 64,
            feed_capacity: 500,
            inertial_silence_secs: 5.0,
            location_silence_secs: 30.0,
            barometer_silence_secs: 10.0,
        }
    }
}

// ─── Top level ───────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub altitude: AltitudeConfig,
    pub smoother: SmootherConfig,
    pub grade: GradeConfig,
    pub classifier: ClassifierConfig,
    pub arbiter: ArbiterConfig,
    pub sampling: SamplingControllerConfig,
    pub session: SessionConfig,
}

fn require(condition: bool, what: &str) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(TrackerError::InvalidConfig(what.to_string()))
    }
}

fn is_unit(value: f64) -> bool {
    (0.0..=1.0).contains(&value)
}

impl TrackerConfig {
    /// Load a (possibly partial) JSON config; missing fields keep defaults.
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: TrackerConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let a = &self.altitude;
        require(a.process_noise >= 0.0, "altitude.process_noise must be >= 0")?;
        require(a.measurement_noise > 0.0, "altitude.measurement_noise must be > 0")?;
        require(a.uncertainty_floor > 0.0, "altitude.uncertainty_floor must be > 0")?;
        require(a.stability_window >= 2, "altitude.stability_window must be >= 2")?;
        require(a.gps_window > 0, "altitude.gps_window must be > 0")?;
        require(
            a.gps_min_samples > 0 && a.gps_min_samples <= a.gps_window,
            "altitude.gps_min_samples must be in 1..=gps_window",
        )?;
        require(is_unit(a.gps_blend_fraction), "altitude.gps_blend_fraction must be in [0,1]")?;
        require(a.gps_max_correction >= 0.0, "altitude.gps_max_correction must be >= 0")?;
        require(a.gps_inflation_per_meter >= 0.0, "altitude.gps_inflation_per_meter must be >= 0")?;
        require(a.stability_std_scale > 0.0, "altitude.stability_std_scale must be > 0")?;
        require(is_unit(a.stable_noise_reduction), "altitude.stable_noise_reduction must be in [0,1]")?;
        require(a.gps_agreement_scale > 0.0, "altitude.gps_agreement_scale must be > 0")?;
        require(a.recency_horizon_secs > 0.0, "altitude.recency_horizon_secs must be > 0")?;

        let s = &self.smoother;
        require(s.measurement_noise > 0.0, "smoother.measurement_noise must be > 0")?;
        require(s.meters_per_degree > 0.0, "smoother.meters_per_degree must be > 0")?;
        require(s.max_gap_secs > 0.0, "smoother.max_gap_secs must be > 0")?;

        let g = &self.grade;
        require(g.window_size >= 2, "grade.window_size must be >= 2")?;
        require(is_unit(g.min_confidence), "grade.min_confidence must be in [0,1]")?;
        require(g.noise_gate_m >= 0.0, "grade.noise_gate_m must be >= 0")?;
        require(g.min_segment_distance_m > 0.0, "grade.min_segment_distance_m must be > 0")?;
        require(g.max_grade_percent >= 0.0, "grade.max_grade_percent must be >= 0")?;

        let c = &self.classifier;
        require(c.buffer_capacity > 0, "classifier.buffer_capacity must be > 0")?;
        require(
            c.min_samples >= 4 && c.min_samples <= c.buffer_capacity,
            "classifier.min_samples must be in 4..=buffer_capacity",
        )?;
        require(c.analysis_interval_secs > 0.0, "classifier.analysis_interval_secs must be > 0")?;
        require(
            c.min_step_hz > 0.0 && c.min_step_hz < c.max_step_hz,
            "classifier step band must satisfy 0 < min_step_hz < max_step_hz",
        )?;
        require(c.smoother_window > 0, "classifier.smoother_window must be > 0")?;
        require(
            c.band_edges_hz.windows(2).all(|w| w[0] < w[1]) && c.band_edges_hz[0] > 0.0,
            "classifier.band_edges_hz must be positive and strictly increasing",
        )?;

        let r = &self.arbiter;
        require(
            is_unit(r.medium_confidence)
                && is_unit(r.high_confidence)
                && r.medium_confidence <= r.high_confidence,
            "arbiter thresholds must satisfy 0 <= medium <= high <= 1",
        )?;
        require(r.agreement_boost >= 0.0, "arbiter.agreement_boost must be >= 0")?;
        require(is_unit(r.disagreement_penalty), "arbiter.disagreement_penalty must be in [0,1]")?;
        require(is_unit(r.hint_trust), "arbiter.hint_trust must be in [0,1]")?;
        require(is_unit(r.default_confidence), "arbiter.default_confidence must be in [0,1]")?;
        require(r.history_capacity > 0, "arbiter.history_capacity must be > 0")?;

        let p = &self.sampling;
        require(p.speed_window > 0, "sampling.speed_window must be > 0")?;
        require(
            p.stationary_max_speed < p.walking_max_speed && p.walking_max_speed < p.jogging_max_speed,
            "sampling speed bands must be increasing",
        )?;
        require(
            p.ultra_low_battery <= p.critical_battery && p.critical_battery <= p.low_battery,
            "sampling battery thresholds must satisfy ultra_low <= critical <= low",
        )?;
        require(p.min_reconfigure_interval_secs >= 0.0, "sampling.min_reconfigure_interval_secs must be >= 0")?;
        require(p.long_session_secs > 0.0, "sampling.long_session_secs must be > 0")?;

        let e = &self.session;
        require(
            e.detection_interval_secs > 0.0 && e.detection_interval_secs <= 10.0,
            "session.detection_interval_secs must be in (0, 10]",
        )?;
        require(e.event_capacity > 0, "session.event_capacity must be > 0")?;
        require(e.feed_capacity > 0, "session.feed_capacity must be > 0")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(TrackerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_buffer_rejected() {
        let mut config = TrackerConfig::default();
        config.classifier.buffer_capacity = 0;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, TrackerError::InvalidConfig(_)));
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let mut config = TrackerConfig::default();
        config.arbiter.medium_confidence = 0.9;
        assert!(config.validate().is_err());

        let mut config = TrackerConfig::default();
        config.sampling.walking_max_speed = 0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bounds_that_would_panic_are_rejected() {
        let cases: Vec<fn(&mut TrackerConfig)> = vec![
            |c| c.altitude.gps_max_correction = -1.0,
            |c| c.altitude.gps_max_correction = f64::NAN,
            |c| c.grade.max_grade_percent = -5.0,
            |c| c.altitude.stability_std_scale = 0.0,
            |c| c.altitude.gps_agreement_scale = -2.0,
            |c| c.altitude.stable_noise_reduction = 1.5,
            |c| c.arbiter.agreement_boost = -0.1,
        ];
        for mutate in cases {
            let mut config = TrackerConfig::default();
            mutate(&mut config);
            assert!(matches!(config.validate(), Err(TrackerError::InvalidConfig(_))));
        }
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let json = r#"{ "grade": { "noise_gate_m": 0.5 }, "arbiter": { "default_terrain": "trail" } }"#;
        let config: TrackerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.grade.noise_gate_m, 0.5);
        assert_eq!(config.grade.window_size, GradeConfig::default().window_size);
        assert_eq!(config.arbiter.default_terrain, TerrainType::Trail);
        assert!(config.validate().is_ok());
    }
}
