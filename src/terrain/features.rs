//! Motion feature extraction over a buffered inertial window

use std::f64::consts::PI;

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::config::ClassifierConfig;
use crate::smoothing::HannSmoother;
use crate::types::SensorSample;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MotionFeatures {
    /// Cadence [Hz]
    pub step_frequency_hz: f64,
    /// Variance of acceleration magnitude [g²]
    pub accel_variance: f64,
    /// Mean absolute vertical acceleration [g]
    pub vertical_accel: f64,
    /// 1 / (1 + CV of step intervals), 0 when steps cannot be timed
    pub step_regularity: f64,
    /// Variance of rotation-rate magnitude [(rad/s)²]
    pub rotation_variance: f64,
    /// Mean frame-to-frame change in acceleration magnitude [g]
    pub impact_intensity: f64,
    /// Relative power in each of the four step bands, sums to 1 or is all zero
    pub band_power: [f64; 4],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepMethod {
    Autocorrelation,
    PeakCount,
    /// Below the noise floor or no usable periodicity
    None,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeatureExtraction {
    pub features: MotionFeatures,
    pub step_method: StepMethod,
    pub sample_rate_hz: f64,
}

/// Compute the seven motion features. Returns `None` when the window has no
/// usable time span.
pub fn extract_features(samples: &[SensorSample], config: &ClassifierConfig) -> Option<FeatureExtraction> {
    let n = samples.len();
    if n < 3 {
        return None;
    }
    let t0 = samples[0].timestamp;
    let duration = samples[n - 1].timestamp - t0;
    if !(duration > 0.0) {
        return None;
    }
    let sample_rate_hz = (n - 1) as f64 / duration;

    let magnitude: Array1<f64> = samples.iter().map(SensorSample::accel_magnitude).collect();
    let vertical: Array1<f64> = samples.iter().map(|s| s.accel.2).collect();
    let rotation: Array1<f64> = samples.iter().map(SensorSample::rotation_magnitude).collect();
    let times: Vec<f64> = samples.iter().map(|s| s.timestamp - t0).collect();

    let accel_variance = magnitude.var(0.0);
    let vertical_accel = vertical.mapv(f64::abs).mean().unwrap_or(0.0);
    let rotation_variance = rotation.var(0.0);
    let impact_intensity = magnitude
        .iter()
        .zip(magnitude.iter().skip(1))
        .map(|(a, b)| (b - a).abs())
        .sum::<f64>()
        / (n - 1) as f64;

    let step_signal = &vertical - vertical.mean().unwrap_or(0.0);
    let step_signal = step_signal.to_vec();
    let band_power = band_power_profile(&step_signal, &times, &config.band_edges_hz);

    let (step_frequency_hz, step_regularity, step_method) = if vertical.std(0.0) < config.noise_floor_g {
        (0.0, 0.0, StepMethod::None)
    } else {
        let peaks = find_step_peaks(&step_signal, &times, config);
        let regularity = step_regularity(&peaks);
        match autocorrelation_step_frequency(&step_signal, sample_rate_hz, config) {
            Some(freq) => (freq, regularity, StepMethod::Autocorrelation),
            None => match peak_count_frequency(&peaks, config) {
                Some(freq) => (freq, regularity, StepMethod::PeakCount),
                None => (0.0, 0.0, StepMethod::None),
            },
        }
    };

    Some(FeatureExtraction {
        features: MotionFeatures {
            step_frequency_hz,
            accel_variance,
            vertical_accel,
            step_regularity,
            rotation_variance,
            impact_intensity,
            band_power,
        },
        step_method,
        sample_rate_hz,
    })
}

/// Normalized autocorrelation over the cadence lag range. Picks the
/// strongest local peak (the shortest lag within 90% of it, to avoid locking
/// onto a stride harmonic) and refines it with parabolic interpolation.
fn autocorrelation_step_frequency(signal: &[f64], sample_rate: f64, config: &ClassifierConfig) -> Option<f64> {
    let n = signal.len();
    let energy: f64 = signal.iter().map(|v| v * v).sum();
    if energy <= f64::EPSILON {
        return None;
    }

    let min_lag = ((sample_rate / config.max_step_hz).ceil() as usize).max(1);
    let max_lag = ((sample_rate / config.min_step_hz).floor() as usize).min(n / 2);
    if max_lag < min_lag + 1 || max_lag + 1 >= n {
        return None;
    }

    let r: Vec<f64> = (0..=max_lag + 1)
        .map(|lag| {
            signal
                .iter()
                .zip(signal.iter().skip(lag))
                .map(|(a, b)| a * b)
                .sum::<f64>()
                / energy
        })
        .collect();

    let candidates: Vec<usize> = (min_lag..=max_lag)
        .filter(|&lag| r[lag] > r[lag - 1] && r[lag] >= r[lag + 1] && r[lag] >= config.autocorr_min_peak)
        .collect();

    let strongest = candidates.iter().map(|&lag| r[lag]).fold(f64::NEG_INFINITY, f64::max);
    let lag = *candidates.iter().find(|&&lag| r[lag] >= 0.9 * strongest)?;

    let (left, centre, right) = (r[lag - 1], r[lag], r[lag + 1]);
    let denom = left - 2.0 * centre + right;
    let offset = if denom.abs() > 1e-12 {
        (0.5 * (left - right) / denom).clamp(-0.5, 0.5)
    } else {
        0.0
    };

    let freq = sample_rate / (lag as f64 + offset);
    (freq.is_finite() && freq >= config.min_step_hz && freq <= config.max_step_hz).then_some(freq)
}

/// Times of local maxima in the Hann-smoothed signal above mean + 0.5 std,
/// spaced at least the minimum step interval apart
fn find_step_peaks(signal: &[f64], times: &[f64], config: &ClassifierConfig) -> Vec<f64> {
    let smoothed = HannSmoother::new(config.smoother_window).smooth_series(signal);
    let series = Array1::from_vec(smoothed);
    let threshold = series.mean().unwrap_or(0.0) + 0.5 * series.std(0.0);

    let mut peaks: Vec<f64> = Vec::new();
    for i in 1..series.len().saturating_sub(1) {
        let v = series[i];
        if v > series[i - 1] && v >= series[i + 1] && v > threshold {
            let t = times[i];
            if peaks.last().map_or(true, |&last| t - last >= config.min_peak_interval_secs) {
                peaks.push(t);
            }
        }
    }
    peaks
}

fn peak_count_frequency(peaks: &[f64], config: &ClassifierConfig) -> Option<f64> {
    if peaks.len() < 2 {
        return None;
    }
    let span = peaks[peaks.len() - 1] - peaks[0];
    if span <= 0.0 {
        return None;
    }
    let freq = (peaks.len() - 1) as f64 / span;
    (freq >= config.min_step_hz && freq <= config.max_step_hz).then_some(freq)
}

fn step_regularity(peaks: &[f64]) -> f64 {
    if peaks.len() < 3 {
        return 0.0;
    }
    let intervals: Array1<f64> = peaks.windows(2).map(|w| w[1] - w[0]).collect();
    let mean = intervals.mean().unwrap_or(0.0);
    if mean <= 0.0 {
        return 0.0;
    }
    let cv = intervals.std(0.0) / mean;
    1.0 / (1.0 + cv)
}

/// Relative power per band from a direct cos/sin projection at three probe
/// frequencies inside each band. Sample spacing need not be uniform.
pub fn band_power_profile(signal: &[f64], times: &[f64], edges: &[f64; 5]) -> [f64; 4] {
    const PROBES_PER_BAND: usize = 3;

    let n = signal.len().max(1) as f64;
    let mut bands = [0.0; 4];
    for (band, power) in bands.iter_mut().enumerate() {
        let (lo, hi) = (edges[band], edges[band + 1]);
        let step = (hi - lo) / PROBES_PER_BAND as f64;
        *power = (0..PROBES_PER_BAND)
            .map(|k| {
                let freq = lo + (k as f64 + 0.5) * step;
                let (re, im) = signal.iter().zip(times.iter()).fold((0.0, 0.0), |(re, im), (x, t)| {
                    let phase = 2.0 * PI * freq * t;
                    (re + x * phase.cos(), im + x * phase.sin())
                });
                (re * re + im * im) / (n * n)
            })
            .sum();
    }

    let total: f64 = bands.iter().sum();
    if total <= 1e-12 || !total.is_finite() {
        return [0.0; 4];
    }
    bands.iter_mut().for_each(|p| *p /= total);
    bands
}
