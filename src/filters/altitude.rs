/// Scalar Kalman filter for altitude
///
/// State: altitude [m], variance P [m²]
///
/// Time update:        P += q · Δt
/// Measurement update: K = P / (P + R),  x += K (z − x),  P = (1 − K) P
///
/// R adapts to conditions: inflated when pressure jumps between samples
/// (weather front moving through) and reduced while the recent filtered
/// outputs are steady. GPS altitude is blended in separately as a slow,
/// bounded nudge so a bad fix cannot drag the estimate.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::config::AltitudeConfig;
use crate::types::clamp_unit;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AltitudeEstimate {
    pub altitude: f64,
    pub uncertainty: f64,
    pub stability: f64,
    pub last_update: Option<f64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub score: f64,
    pub stability: f64,
    pub gps_agreement: f64,
    pub certainty: f64,
    pub recency: f64,
}

#[derive(Clone, Copy, Debug)]
struct GpsAltitudeSample {
    altitude: f64,
    accuracy: f64,
    weight: f64,
}

pub struct AltitudeEstimator {
    config: AltitudeConfig,
    altitude: f64,
    uncertainty: f64,
    stability: f64,
    initialized: bool,
    last_timestamp: Option<f64>,
    last_pressure: Option<f64>,
    recent_outputs: VecDeque<f64>,
    gps_samples: VecDeque<GpsAltitudeSample>,
    reference_pressure: Option<f64>,
    /// R of the most recent measurement update [m²]
    last_measurement_noise: Option<f64>,
    measurement_count: u64,
    gps_corrections: u64,
}

impl AltitudeEstimator {
    pub fn new(config: AltitudeConfig) -> Self {
        Self {
            altitude: 0.0,
            uncertainty: config.initial_uncertainty,
            stability: 0.0,
            initialized: false,
            last_timestamp: None,
            last_pressure: None,
            recent_outputs: VecDeque::with_capacity(config.stability_window),
            gps_samples: VecDeque::with_capacity(config.gps_window),
            reference_pressure: None,
            last_measurement_noise: None,
            measurement_count: 0,
            gps_corrections: 0,
            config,
        }
    }

    /// Reset to a known elevation (trailhead marker, benchmark).
    pub fn calibrate(&mut self, known_elevation: f64, reference_pressure: f64) {
        self.altitude = known_elevation;
        self.uncertainty = self.config.calibrated_uncertainty;
        self.stability = 0.0;
        self.initialized = true;
        self.last_pressure = None;
        self.reference_pressure = Some(reference_pressure);
        self.recent_outputs.clear();
        self.gps_samples.clear();
        log::info!(
            "Altitude calibrated to {:.1} m (reference {:.2} hPa)",
            known_elevation,
            reference_pressure
        );
    }

    /// Time update only. Grows the variance by `q · Δt`; a missing or
    /// non-positive Δt leaves it untouched.
    pub fn predict(&mut self, timestamp: f64) -> f64 {
        if let Some(prev) = self.last_timestamp {
            let dt = timestamp - prev;
            if dt > 0.0 && dt.is_finite() {
                self.uncertainty += self.config.process_noise * dt;
                self.last_timestamp = Some(timestamp);
            }
        }
        self.sanitize_uncertainty();
        self.uncertainty
    }

    /// Barometric altitude update. Returns the filtered altitude.
    pub fn process_measurement(&mut self, barometric_altitude: f64, pressure_hpa: f64, timestamp: f64) -> f64 {
        if !barometric_altitude.is_finite() {
            log::debug!("Ignoring non-finite barometric altitude");
            return self.altitude;
        }

        let mut r = self.config.measurement_noise;
        if let Some(prev) = self.last_pressure {
            if (pressure_hpa - prev).abs() > self.config.pressure_jump_hpa {
                r *= self.config.pressure_jump_noise_scale;
                log::info!(
                    "Pressure jump {:.2} hPa, treating barometer as less reliable",
                    pressure_hpa - prev
                );
            }
        }
        if pressure_hpa.is_finite() {
            self.last_pressure = Some(pressure_hpa);
        }
        r *= 1.0 - self.config.stable_noise_reduction * self.stability;

        self.update_with_noise(barometric_altitude, r, timestamp)
    }

    /// GPS altitude used as the measurement itself, for when no barometer is
    /// present. R comes from the reported vertical accuracy.
    pub fn process_gps_only(&mut self, gps_altitude: f64, accuracy: f64, timestamp: f64) -> f64 {
        if !gps_altitude.is_finite() || accuracy <= 0.0 || !accuracy.is_finite() {
            return self.altitude;
        }
        self.update_with_noise(gps_altitude, accuracy * accuracy, timestamp)
    }

    fn update_with_noise(&mut self, z: f64, r: f64, timestamp: f64) -> f64 {
        let r = r.max(self.config.uncertainty_floor);
        self.last_measurement_noise = Some(r);

        if !self.initialized {
            self.altitude = z;
            self.uncertainty = self.uncertainty.min(r);
            self.initialized = true;
            self.last_timestamp = Some(timestamp);
            self.push_output(z);
            self.measurement_count += 1;
            return self.altitude;
        }

        if self.last_timestamp.is_some() {
            self.predict(timestamp);
        } else {
            self.last_timestamp = Some(timestamp);
        }

        let previous = (self.altitude, self.uncertainty);
        let k = self.uncertainty / (self.uncertainty + r);
        let altitude = self.altitude + k * (z - self.altitude);
        let uncertainty = (1.0 - k) * self.uncertainty;

        if !altitude.is_finite() || !k.is_finite() {
            // Keep the last good estimate and trust it less
            self.altitude = previous.0;
            self.uncertainty = previous.1;
            self.stability *= 0.5;
            log::warn!("Altitude update produced a non-finite result, keeping previous estimate");
            return self.altitude;
        }

        self.altitude = altitude;
        self.uncertainty = uncertainty;
        self.sanitize_uncertainty();
        self.push_output(altitude);
        self.measurement_count += 1;
        self.altitude
    }

    /// Buffer a GPS altitude and, when GPS has been consistently good and
    /// disagrees with the filter, pull the state a bounded step toward it.
    pub fn update_gps_altitude(&mut self, gps_altitude: f64, accuracy: f64, timestamp: f64) {
        if !gps_altitude.is_finite() || !(accuracy > 0.0) {
            return;
        }
        let weight = (1.0 / accuracy).clamp(0.1, 1.0);
        if self.gps_samples.len() == self.config.gps_window {
            self.gps_samples.pop_front();
        }
        self.gps_samples.push_back(GpsAltitudeSample {
            altitude: gps_altitude,
            accuracy,
            weight,
        });

        if !self.initialized || self.gps_samples.len() < self.config.gps_min_samples {
            return;
        }
        let consistently_good = self
            .gps_samples
            .iter()
            .all(|s| s.accuracy <= self.config.gps_good_accuracy);
        if !consistently_good {
            return;
        }

        let Some(average) = self.gps_weighted_average() else {
            return;
        };
        let disagreement = average - self.altitude;
        if disagreement.abs() <= self.config.gps_disagreement_margin {
            return;
        }

        let max = self.config.gps_max_correction;
        let correction = (disagreement * self.config.gps_blend_fraction).clamp(-max, max);
        self.altitude += correction;
        self.uncertainty += correction.abs() * self.config.gps_inflation_per_meter;
        self.sanitize_uncertainty();
        self.gps_corrections += 1;
        log::debug!(
            "GPS altitude nudge {:+.2} m at t={:.1} (disagreement {:.1} m)",
            correction,
            timestamp,
            disagreement
        );
    }

    fn gps_weighted_average(&self) -> Option<f64> {
        let total: f64 = self.gps_samples.iter().map(|s| s.weight).sum();
        if total <= 0.0 {
            return None;
        }
        Some(self.gps_samples.iter().map(|s| s.altitude * s.weight).sum::<f64>() / total)
    }

    /// Product of four [0,1] sub-scores.
    pub fn assess_quality(&self, now: f64) -> QualityReport {
        let stability = self.stability;
        let gps_agreement = match self.gps_weighted_average() {
            Some(avg) if self.initialized => {
                clamp_unit(1.0 - (avg - self.altitude).abs() / self.config.gps_agreement_scale)
            }
            // No GPS reference: neither confirms nor contradicts
            _ => 0.5,
        };
        let certainty = 1.0 / (1.0 + self.uncertainty);
        let recency = match self.last_timestamp {
            Some(ts) => clamp_unit(1.0 - (now - ts).max(0.0) / self.config.recency_horizon_secs),
            None => 0.0,
        };

        QualityReport {
            score: clamp_unit(stability * gps_agreement * certainty * recency),
            stability,
            gps_agreement,
            certainty,
            recency,
        }
    }

    fn push_output(&mut self, value: f64) {
        if self.recent_outputs.len() == self.config.stability_window {
            self.recent_outputs.pop_front();
        }
        self.recent_outputs.push_back(value);
        self.stability = self.compute_stability();
    }

    fn compute_stability(&self) -> f64 {
        let n = self.recent_outputs.len();
        if n < self.config.stability_window {
            return 0.0;
        }
        let mean = self.recent_outputs.iter().sum::<f64>() / n as f64;
        let var = self.recent_outputs.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
        clamp_unit(1.0 - var.sqrt() / self.config.stability_std_scale)
    }

    fn sanitize_uncertainty(&mut self) {
        if !self.uncertainty.is_finite() || self.uncertainty < self.config.uncertainty_floor {
            self.uncertainty = self.config.uncertainty_floor;
        }
    }

    pub fn estimate(&self) -> AltitudeEstimate {
        AltitudeEstimate {
            altitude: self.altitude,
            uncertainty: self.uncertainty,
            stability: self.stability,
            last_update: self.last_timestamp,
        }
    }

    /// Confidence in [0, 1] from the variance relative to the noise of the
    /// source currently feeding the filter. A 6 m GPS-only fix and a 1 m
    /// barometer reading both settle well above one half once converged.
    pub fn measurement_confidence(&self) -> f64 {
        if !self.initialized {
            return 0.0;
        }
        let r = self
            .last_measurement_noise
            .unwrap_or(self.config.measurement_noise)
            .max(self.config.uncertainty_floor);
        1.0 / (1.0 + (self.uncertainty.max(0.0) / r).sqrt())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn reference_pressure(&self) -> Option<f64> {
        self.reference_pressure
    }

    pub fn measurement_count(&self) -> u64 {
        self.measurement_count
    }

    pub fn gps_corrections(&self) -> u64 {
        self.gps_corrections
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn estimator() -> AltitudeEstimator {
        AltitudeEstimator::new(AltitudeConfig::default())
    }

    #[test]
    fn test_first_measurement_initializes() {
        let mut est = estimator();
        let out = est.process_measurement(120.0, 1000.0, 0.0);
        assert_eq!(out, 120.0);
        assert!(est.is_initialized());
        assert!(est.estimate().uncertainty <= AltitudeConfig::default().measurement_noise);
    }

    #[test]
    fn test_uncertainty_monotonic_across_update_cycle() {
        let mut est = estimator();
        est.calibrate(100.0, 1013.25);
        est.process_measurement(100.5, 1013.2, 0.0);

        for i in 1..50 {
            let t = i as f64 * 0.5;
            let before = est.estimate().uncertainty;
            let predicted = est.predict(t);
            assert!(predicted >= before, "time update shrank P: {} -> {}", before, predicted);

            let z = 100.0 + (i as f64 * 0.7).sin();
            est.process_measurement(z, 1013.2, t);
            let after = est.estimate().uncertainty;
            assert!(after <= predicted, "measurement update grew P: {} -> {}", predicted, after);
            assert!(after > 0.0);
        }
    }

    #[test]
    fn test_pure_time_update_grows_uncertainty() {
        let mut est = estimator();
        est.process_measurement(50.0, 1000.0, 10.0);
        let before = est.estimate().uncertainty;
        let after = est.predict(20.0);
        assert_abs_diff_eq!(after - before, 0.05 * 10.0, epsilon = 1e-12);
    }

    #[test]
    fn test_identical_measurements_converge() {
        let mut est = estimator();
        est.calibrate(0.0, 1013.25);
        let mut converged_at = None;
        for i in 0..100 {
            let out = est.process_measurement(250.0, 985.0, i as f64);
            if (out - 250.0).abs() < 0.5 && converged_at.is_none() {
                converged_at = Some(i);
            }
        }
        let step = converged_at.expect("never converged");
        assert!(step < 60, "converged too slowly: {}", step);
        assert_abs_diff_eq!(est.estimate().altitude, 250.0, epsilon = 0.05);
    }

    #[test]
    fn test_pressure_jump_slows_response() {
        let mut steady = estimator();
        let mut front = estimator();
        for est in [&mut steady, &mut front] {
            est.calibrate(100.0, 1000.0);
            est.process_measurement(100.0, 1000.0, 0.0);
        }
        let a = steady.process_measurement(110.0, 1000.0, 1.0);
        let b = front.process_measurement(110.0, 1002.0, 1.0);
        assert!(b < a, "front-affected update should move less ({} vs {})", b, a);
    }

    #[test]
    fn test_gps_nudge_is_bounded() {
        let mut est = estimator();
        est.calibrate(100.0, 1013.25);
        let before = est.estimate();
        for i in 0..5 {
            est.update_gps_altitude(200.0, 3.0, i as f64);
        }
        let after = est.estimate();
        let moved = after.altitude - before.altitude;
        assert!(moved > 0.0);
        assert!(moved <= AltitudeConfig::default().gps_max_correction + 1e-9);
        assert!(after.uncertainty > before.uncertainty);
        assert_eq!(est.gps_corrections(), 1);
    }

    #[test]
    fn test_poor_gps_is_ignored() {
        let mut est = estimator();
        est.calibrate(100.0, 1013.25);
        for i in 0..10 {
            est.update_gps_altitude(200.0, 40.0, i as f64);
        }
        assert_eq!(est.estimate().altitude, 100.0);
    }

    #[test]
    fn test_gps_only_fallback_tracks() {
        let mut est = estimator();
        for i in 0..30 {
            est.process_gps_only(75.0, 4.0, i as f64);
        }
        assert_abs_diff_eq!(est.estimate().altitude, 75.0, epsilon = 1e-9);
    }

    #[test]
    fn test_confidence_scales_with_source_noise() {
        let mut gps = estimator();
        assert_eq!(gps.measurement_confidence(), 0.0);
        for i in 0..120 {
            gps.process_gps_only(300.0, 6.0, i as f64);
        }
        // P settles near 1.3 m², small next to the 36 m² fix noise
        assert!(gps.estimate().uncertainty > 1.0);
        assert!(gps.measurement_confidence() > 0.8);

        let mut baro = estimator();
        for i in 0..120 {
            baro.process_measurement(300.0, 980.0, i as f64);
        }
        assert!(baro.measurement_confidence() > 0.5);
    }

    #[test]
    fn test_quality_breakdown() {
        let mut est = estimator();
        est.calibrate(100.0, 1013.25);
        for i in 0..10 {
            est.process_measurement(100.0, 1013.25, i as f64);
        }
        let fresh = est.assess_quality(9.0);
        assert!(fresh.score > 0.0 && fresh.score <= 1.0);
        assert_abs_diff_eq!(fresh.recency, 1.0, epsilon = 1e-12);
        assert!(fresh.stability > 0.9);

        let stale = est.assess_quality(200.0);
        assert_eq!(stale.recency, 0.0);
        assert_eq!(stale.score, 0.0);
    }

    #[test]
    fn test_non_finite_input_keeps_state() {
        let mut est = estimator();
        est.calibrate(10.0, 1000.0);
        let out = est.process_measurement(f64::NAN, 1000.0, 1.0);
        assert_eq!(out, 10.0);
        assert!(est.estimate().uncertainty > 0.0);
    }

    #[test]
    fn test_estimate_roundtrip() {
        let mut est = estimator();
        est.process_measurement(321.5, 990.0, 42.0);
        let snapshot = est.estimate();
        let json = serde_json::to_string(&snapshot).unwrap();
        let restored: AltitudeEstimate = serde_json::from_str(&json).unwrap();
        assert_eq!(snapshot, restored);
    }
}
