use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::config::GradeConfig;
use crate::types::clamp_unit;

#[derive(Clone, Copy, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct GradeReading {
    pub instantaneous_percent: f64,
    pub smoothed_percent: f64,
    pub confidence: f64,
    pub gain_m: f64,
    pub loss_m: f64,
}

#[derive(Clone, Copy, Debug)]
struct GradePoint {
    altitude: f64,
    distance_m: f64,
    confidence: f64,
    timestamp: f64,
}

/// Slope and cumulative climb from filtered altitude along the track.
///
/// Points below the confidence floor never enter the window. Gain/loss is
/// measured against a reference altitude that only moves once the climb
/// from it exceeds the noise gate, so slow steady climbs add up while
/// barometer jitter around a fixed level adds nothing.
pub struct GradeAggregator {
    config: GradeConfig,
    window: VecDeque<GradePoint>,
    instantaneous: f64,
    gain_reference: Option<f64>,
    gain_m: f64,
    loss_m: f64,
    rejected: u64,
}

impl GradeAggregator {
    pub fn new(config: GradeConfig) -> Self {
        Self {
            window: VecDeque::with_capacity(config.window_size),
            instantaneous: 0.0,
            gain_reference: None,
            gain_m: 0.0,
            loss_m: 0.0,
            rejected: 0,
            config,
        }
    }

    /// Add a filtered altitude at a cumulative track distance. Returns
    /// whether the point was accepted.
    pub fn add_point(&mut self, altitude: f64, distance_m: f64, confidence: f64, timestamp: f64) -> bool {
        if !altitude.is_finite() || !distance_m.is_finite() || confidence < self.config.min_confidence {
            self.rejected += 1;
            return false;
        }
        if let Some(last) = self.window.back() {
            if timestamp < last.timestamp {
                self.rejected += 1;
                return false;
            }

            let delta = altitude - last.altitude;
            let run = distance_m - last.distance_m;
            if run >= self.config.min_segment_distance_m {
                self.instantaneous = self.clamp_grade(delta / run * 100.0);
            }
        }

        self.accumulate_climb(altitude);
        if self.window.len() == self.config.window_size {
            self.window.pop_front();
        }
        self.window.push_back(GradePoint {
            altitude,
            distance_m,
            confidence: clamp_unit(confidence),
            timestamp,
        });
        true
    }

    fn accumulate_climb(&mut self, altitude: f64) {
        let Some(reference) = self.gain_reference else {
            self.gain_reference = Some(altitude);
            return;
        };
        let climb = altitude - reference;
        if climb.abs() <= self.config.noise_gate_m {
            return;
        }
        if climb > 0.0 {
            self.gain_m += climb;
        } else {
            self.loss_m -= climb;
        }
        self.gain_reference = Some(altitude);
    }

    fn clamp_grade(&self, grade: f64) -> f64 {
        grade.clamp(-self.config.max_grade_percent, self.config.max_grade_percent)
    }

    /// Confidence-weighted mean of segment grades, newer segments weighted
    /// linearly higher. Segments shorter than the minimum run are skipped.
    fn smoothed(&self) -> (f64, usize) {
        let mut weighted = 0.0;
        let mut total = 0.0;
        let mut used = 0;
        for (idx, pair) in self.window.iter().collect::<Vec<_>>().windows(2).enumerate() {
            let (a, b) = (pair[0], pair[1]);
            let run = b.distance_m - a.distance_m;
            if run < self.config.min_segment_distance_m {
                continue;
            }
            let grade = self.clamp_grade((b.altitude - a.altitude) / run * 100.0);
            let weight = b.confidence * (idx + 1) as f64;
            weighted += grade * weight;
            total += weight;
            used += 1;
        }
        if total > 0.0 {
            (weighted / total, used)
        } else {
            (0.0, 0)
        }
    }

    pub fn reading(&self) -> GradeReading {
        let (smoothed, used) = self.smoothed();
        let confidence = if self.window.is_empty() {
            0.0
        } else {
            let mean = self.window.iter().map(|p| p.confidence).sum::<f64>() / self.window.len() as f64;
            let fill = used as f64 / (self.config.window_size - 1) as f64;
            clamp_unit(mean * fill.min(1.0))
        };
        GradeReading {
            instantaneous_percent: self.instantaneous,
            smoothed_percent: smoothed,
            confidence,
            gain_m: self.gain_m,
            loss_m: self.loss_m,
        }
    }

    /// Energy-cost multiplier for a grade, consumed by the calorie engine.
    /// Descent uses a gentler curve than ascent.
    pub fn grade_energy_multiplier(&self, grade_percent: f64) -> f64 {
        let g = grade_percent.abs() / 100.0;
        let (linear, quadratic) = if grade_percent >= 0.0 {
            self.config.ascent_coefficients
        } else {
            self.config.descent_coefficients
        };
        1.0 + linear * g + quadratic * g * g
    }

    pub fn rejected_count(&self) -> u64 {
        self.rejected
    }

    pub fn reset(&mut self) {
        self.window.clear();
        self.instantaneous = 0.0;
        self.gain_reference = None;
        self.gain_m = 0.0;
        self.loss_m = 0.0;
        self.rejected = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn aggregator() -> GradeAggregator {
        GradeAggregator::new(GradeConfig::default())
    }

    #[test]
    fn test_constant_slope_converges() {
        let mut agg = aggregator();
        for i in 0..30 {
            let d = i as f64 * 8.0;
            agg.add_point(200.0 + 0.06 * d, d, 0.9, i as f64);
        }
        let reading = agg.reading();
        assert!((reading.smoothed_percent - 6.0).abs() < 0.5);
        assert_abs_diff_eq!(reading.instantaneous_percent, 6.0, epsilon = 1e-9);
        assert!(reading.confidence > 0.8);
    }

    #[test]
    fn test_low_confidence_points_discarded() {
        let mut agg = aggregator();
        assert!(agg.add_point(100.0, 0.0, 0.9, 0.0));
        assert!(!agg.add_point(150.0, 10.0, 0.3, 1.0));
        assert_eq!(agg.reading().gain_m, 0.0);
        assert_eq!(agg.reading().instantaneous_percent, 0.0);
        assert_eq!(agg.rejected_count(), 1);
    }

    #[test]
    fn test_noise_gate_drops_small_deltas() {
        let mut agg = aggregator();
        for i in 0..20 {
            // 0.1 m jitter up and down
            let alt = if i % 2 == 0 { 100.0 } else { 100.1 };
            agg.add_point(alt, 0.0, 0.9, i as f64);
        }
        let reading = agg.reading();
        assert_eq!(reading.gain_m, 0.0);
        assert_eq!(reading.loss_m, 0.0);
    }

    #[test]
    fn test_gain_and_loss_accumulate() {
        let mut agg = aggregator();
        agg.add_point(100.0, 0.0, 0.9, 0.0);
        agg.add_point(101.0, 10.0, 0.9, 1.0);
        agg.add_point(100.5, 20.0, 0.9, 2.0);
        let reading = agg.reading();
        assert_abs_diff_eq!(reading.gain_m, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(reading.loss_m, 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(reading.instantaneous_percent, -5.0, epsilon = 1e-9);
    }

    #[test]
    fn test_slow_climb_accumulates_gain() {
        let mut agg = aggregator();
        // 8% at 1.1 m per fix: 0.088 m per step, below the gate every time
        for i in 0..300 {
            let d = i as f64 * 1.1;
            agg.add_point(400.0 + 0.08 * d, d, 0.9, i as f64);
        }
        let reading = agg.reading();
        let climbed = 0.08 * 299.0 * 1.1;
        assert!(reading.gain_m > climbed - 0.2 && reading.gain_m <= climbed + 1e-9, "{}", reading.gain_m);
        assert_eq!(reading.loss_m, 0.0);
    }

    #[test]
    fn test_short_runs_do_not_produce_grade() {
        let mut agg = aggregator();
        agg.add_point(100.0, 0.0, 0.9, 0.0);
        agg.add_point(103.0, 0.2, 0.9, 1.0);
        let reading = agg.reading();
        assert_eq!(reading.instantaneous_percent, 0.0);
        assert_eq!(reading.smoothed_percent, 0.0);
        assert_eq!(reading.confidence, 0.0);
    }

    #[test]
    fn test_energy_multiplier_descent_gentler() {
        let agg = aggregator();
        assert_eq!(agg.grade_energy_multiplier(0.0), 1.0);
        let up = agg.grade_energy_multiplier(10.0);
        let down = agg.grade_energy_multiplier(-10.0);
        assert_abs_diff_eq!(up, 1.0 + 3.0 * 0.1 + 9.0 * 0.01, epsilon = 1e-12);
        assert!(down > 1.0 && down < up);
    }
}
