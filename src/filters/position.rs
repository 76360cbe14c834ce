/// 4-state constant-velocity Kalman filter over raw position fixes
///
/// State Vector (4D), in degrees:
/// [0]: latitude
/// [1]: longitude
/// [2]: latitude rate  (deg/s)
/// [3]: longitude rate (deg/s)
///
/// Only position is observed. The 2×2 innovation covariance is inverted in
/// closed form; a near-singular one skips the correction for that cycle.

use serde::{Deserialize, Serialize};

use crate::config::SmootherConfig;
use crate::types::{FixNoise, FixVec, JacobianFix, KalmanGainFix, LocationFix, StateMat4, StateVec4};

const EARTH_RADIUS_M: f64 = 6_371_000.0;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositionEstimate {
    pub latitude: f64,
    pub longitude: f64,
    pub velocity: (f64, f64),
    pub speed_mps: f64,
    pub uncertainty_m: f64,
    pub distance_m: f64,
    pub updates: u64,
}

/// What a fix did to the filter
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SmootherUpdate {
    /// First fix (or first after a long gap): state seeded from the fix
    Initialized,
    Corrected,
    /// Innovation covariance was singular; prediction kept, no correction
    Degenerate,
    /// Out-of-order or duplicate timestamp
    Ignored,
}

pub struct PositionSmoother {
    config: SmootherConfig,
    state: StateVec4,
    covariance: StateMat4,
    measurement_noise: FixNoise,
    initialized: bool,
    last_timestamp: Option<f64>,
    distance_m: f64,
    update_count: u64,
    degenerate_count: u64,
}

impl PositionSmoother {
    pub fn new(config: SmootherConfig) -> Self {
        let measurement_noise = FixNoise::identity() * config.measurement_noise;
        let covariance = Self::initial_covariance(&config);
        Self {
            config,
            state: StateVec4::zeros(),
            covariance,
            measurement_noise,
            initialized: false,
            last_timestamp: None,
            distance_m: 0.0,
            update_count: 0,
            degenerate_count: 0,
        }
    }

    fn initial_covariance(config: &SmootherConfig) -> StateMat4 {
        let p = config.initial_position_variance;
        let v = config.initial_velocity_variance;
        StateMat4::from_diagonal(&StateVec4::new(p, p, v, v))
    }

    fn transition(dt: f64) -> StateMat4 {
        let mut f = StateMat4::identity();
        f[(0, 2)] = dt;
        f[(1, 3)] = dt;
        f
    }

    fn process_noise(&self, dt: f64) -> StateMat4 {
        let q = self.config.process_noise_coeff;
        let q_pos = 0.25 * dt.powi(4) * q;
        let q_cross = 0.5 * dt.powi(3) * q;
        let q_vel = dt.powi(2) * q;
        let mut m = StateMat4::zeros();
        m[(0, 0)] = q_pos;
        m[(1, 1)] = q_pos;
        m[(0, 2)] = q_cross;
        m[(2, 0)] = q_cross;
        m[(1, 3)] = q_cross;
        m[(3, 1)] = q_cross;
        m[(2, 2)] = q_vel;
        m[(3, 3)] = q_vel;
        m
    }

    fn measurement_matrix() -> JacobianFix {
        let mut h = JacobianFix::zeros();
        h[(0, 0)] = 1.0;
        h[(1, 1)] = 1.0;
        h
    }

    /// Closed-form inverse of a 2×2 matrix; `None` when (relatively) singular.
    fn invert_2x2(s: &FixNoise) -> Option<FixNoise> {
        let det = s[(0, 0)] * s[(1, 1)] - s[(0, 1)] * s[(1, 0)];
        let scale = (s[(0, 0)] * s[(1, 1)]).abs().max(f64::MIN_POSITIVE);
        if !det.is_finite() || det.abs() <= 1e-12 * scale {
            return None;
        }
        Some(FixNoise::new(
            s[(1, 1)] / det,
            -s[(0, 1)] / det,
            -s[(1, 0)] / det,
            s[(0, 0)] / det,
        ))
    }

    pub fn predict(&mut self, dt: f64) {
        let f = Self::transition(dt);
        self.state = f * self.state;
        self.covariance = f * self.covariance * f.transpose() + self.process_noise(dt);
        // keep symmetric
        self.covariance = 0.5 * (self.covariance + self.covariance.transpose());
    }

    fn correct(&mut self, measurement: FixVec) -> SmootherUpdate {
        let h = Self::measurement_matrix();
        let s: FixNoise = h * self.covariance * h.transpose() + self.measurement_noise;

        let Some(s_inv) = Self::invert_2x2(&s) else {
            self.degenerate_count += 1;
            log::warn!("Position innovation covariance is singular, skipping correction");
            return SmootherUpdate::Degenerate;
        };

        let k: KalmanGainFix = self.covariance * h.transpose() * s_inv;
        let residual = measurement - h * self.state;
        let state = self.state + k * residual;
        let covariance = (StateMat4::identity() - k * h) * self.covariance;

        if state.iter().any(|v| !v.is_finite()) || covariance.iter().any(|v| !v.is_finite()) {
            self.degenerate_count += 1;
            log::warn!("Position correction produced non-finite values, keeping prediction");
            return SmootherUpdate::Degenerate;
        }

        self.state = state;
        self.covariance = covariance;
        SmootherUpdate::Corrected
    }

    /// Feed one fix: predict to its timestamp, then correct.
    pub fn update(&mut self, fix: &LocationFix) -> SmootherUpdate {
        if !fix.latitude.is_finite() || !fix.longitude.is_finite() {
            return SmootherUpdate::Ignored;
        }

        let gap = self.last_timestamp.map(|ts| fix.timestamp - ts);
        match gap {
            Some(dt) if dt <= 0.0 => return SmootherUpdate::Ignored,
            Some(dt) if dt <= self.config.max_gap_secs && self.initialized => {
                let before = (self.state[0], self.state[1]);
                self.predict(dt);
                let outcome = self.correct(FixVec::new(fix.latitude, fix.longitude));
                self.distance_m += haversine_distance(before.0, before.1, self.state[0], self.state[1]);
                self.last_timestamp = Some(fix.timestamp);
                self.update_count += 1;
                outcome
            }
            _ => {
                if self.initialized {
                    log::info!("Position gap too long, restarting smoother from latest fix");
                }
                self.state = StateVec4::new(fix.latitude, fix.longitude, 0.0, 0.0);
                self.covariance = Self::initial_covariance(&self.config);
                self.initialized = true;
                self.last_timestamp = Some(fix.timestamp);
                self.update_count += 1;
                SmootherUpdate::Initialized
            }
        }
    }

    /// Ground speed from the filtered velocity [m/s]
    pub fn speed_mps(&self) -> f64 {
        let v_lat = self.state[2];
        let mut v_lon = self.state[3];
        if self.config.latitude_correction {
            v_lon *= self.state[0].to_radians().cos();
        }
        (v_lat * v_lat + v_lon * v_lon).sqrt() * self.config.meters_per_degree
    }

    pub fn estimate(&self) -> Option<PositionEstimate> {
        if !self.initialized {
            return None;
        }
        let uncertainty_deg = ((self.covariance[(0, 0)] + self.covariance[(1, 1)]) / 2.0).max(0.0).sqrt();
        Some(PositionEstimate {
            latitude: self.state[0],
            longitude: self.state[1],
            velocity: (self.state[2], self.state[3]),
            speed_mps: self.speed_mps(),
            uncertainty_m: uncertainty_deg * self.config.meters_per_degree,
            distance_m: self.distance_m,
            updates: self.update_count,
        })
    }

    /// Cumulative distance along the smoothed track [m]
    pub fn distance_m(&self) -> f64 {
        self.distance_m
    }

    pub fn degenerate_count(&self) -> u64 {
        self.degenerate_count
    }

    pub fn covariance_trace(&self) -> f64 {
        self.covariance.trace()
    }

    pub fn reset(&mut self) {
        self.state = StateVec4::zeros();
        self.covariance = Self::initial_covariance(&self.config);
        self.initialized = false;
        self.last_timestamp = None;
        self.distance_m = 0.0;
    }

    #[cfg(test)]
    fn set_measurement_noise(&mut self, r: FixNoise) {
        self.measurement_noise = r;
    }
}

pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).max(0.0).sqrt());
    EARTH_RADIUS_M * c
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fix(timestamp: f64, latitude: f64, longitude: f64) -> LocationFix {
        LocationFix {
            timestamp,
            latitude,
            longitude,
            altitude: 0.0,
            horizontal_accuracy: 5.0,
            vertical_accuracy: 5.0,
            speed: -1.0,
            course: 0.0,
        }
    }

    #[test]
    fn test_first_fix_initializes() {
        let mut smoother = PositionSmoother::new(SmootherConfig::default());
        assert!(smoother.estimate().is_none());
        assert_eq!(smoother.update(&fix(0.0, 47.0, 8.0)), SmootherUpdate::Initialized);
        let est = smoother.estimate().unwrap();
        assert_eq!(est.latitude, 47.0);
        assert_eq!(est.speed_mps, 0.0);
    }

    #[test]
    fn test_constant_velocity_speed() {
        // Due north at 1.5 m/s
        let mut smoother = PositionSmoother::new(SmootherConfig::default());
        let step_deg = 1.5 / 111_320.0;
        for i in 0..60 {
            smoother.update(&fix(i as f64, 47.0 + step_deg * i as f64, 8.0));
        }
        let speed = smoother.speed_mps();
        assert!((speed - 1.5).abs() < 0.15, "speed {}", speed);
        let distance = smoother.distance_m();
        assert!((distance - 1.5 * 59.0).abs() < 10.0, "distance {}", distance);
    }

    #[test]
    fn test_latitude_correction_on_eastward_motion() {
        let lat: f64 = 60.0;
        let step_deg = 1.0 / (111_320.0 * lat.to_radians().cos());

        let mut corrected = PositionSmoother::new(SmootherConfig::default());
        let mut raw = PositionSmoother::new(SmootherConfig {
            latitude_correction: false,
            ..SmootherConfig::default()
        });
        for i in 0..60 {
            let f = fix(i as f64, lat, 10.0 + step_deg * i as f64);
            corrected.update(&f);
            raw.update(&f);
        }
        assert!((corrected.speed_mps() - 1.0).abs() < 0.1);
        // Uncorrected conversion overstates speed by 1/cos(60°) = 2
        assert!(raw.speed_mps() > 1.8);
    }

    #[test]
    fn test_singular_innovation_skips_correction() {
        let mut smoother = PositionSmoother::new(SmootherConfig {
            initial_position_variance: 0.0,
            initial_velocity_variance: 0.0,
            process_noise_coeff: 0.0,
            ..SmootherConfig::default()
        });
        smoother.update(&fix(0.0, 47.0, 8.0));
        smoother.set_measurement_noise(FixNoise::zeros());

        let trace_before = smoother.covariance_trace();
        let outcome = smoother.update(&fix(1.0, 47.001, 8.001));
        assert_eq!(outcome, SmootherUpdate::Degenerate);
        let est = smoother.estimate().unwrap();
        assert_eq!(est.latitude, 47.0);
        assert_eq!(smoother.covariance_trace(), trace_before);
        assert_eq!(smoother.degenerate_count(), 1);
    }

    #[test]
    fn test_out_of_order_fix_ignored() {
        let mut smoother = PositionSmoother::new(SmootherConfig::default());
        smoother.update(&fix(5.0, 47.0, 8.0));
        assert_eq!(smoother.update(&fix(4.0, 47.1, 8.0)), SmootherUpdate::Ignored);
    }

    #[test]
    fn test_reset_restores_initial_uncertainty() {
        let config = SmootherConfig::default();
        let expected = 2.0 * (config.initial_position_variance + config.initial_velocity_variance);
        let mut smoother = PositionSmoother::new(config);
        for i in 0..10 {
            smoother.update(&fix(i as f64, 47.0, 8.0));
        }
        smoother.reset();
        assert!(smoother.estimate().is_none());
        assert!((smoother.covariance_trace() - expected).abs() < 1e-20);
        assert_eq!(smoother.distance_m(), 0.0);
    }

    #[test]
    fn test_haversine_one_degree_latitude() {
        let d = haversine_distance(0.0, 0.0, 1.0, 0.0);
        assert!((d - 111_195.0).abs() < 10.0);
    }
}
