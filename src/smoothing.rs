use std::collections::{HashMap, VecDeque};

/// Causal Hann-window smoothing for step-signal peak picking
pub struct HannSmoother {
    window: VecDeque<f64>,
    window_size: usize,
    weights_cache: HashMap<usize, Vec<f64>>,
}

impl HannSmoother {
    pub fn new(window_size: usize) -> Self {
        let window_size = window_size.max(1);
        HannSmoother {
            window: VecDeque::with_capacity(window_size),
            window_size,
            weights_cache: HashMap::new(),
        }
    }

    /// Push a value and return the smoothed output
    pub fn apply(&mut self, value: f64) -> f64 {
        if self.window.len() == self.window_size {
            self.window.pop_front();
        }
        self.window.push_back(value);

        let length = self.window.len();
        if length == 1 {
            return value;
        }

        let weights = self
            .weights_cache
            .entry(length)
            .or_insert_with(|| Self::compute_hann_weights(length));

        self.window.iter().zip(weights.iter()).map(|(v, w)| v * w).sum()
    }

    /// Smooth a whole series from an empty window
    pub fn smooth_series(&mut self, values: &[f64]) -> Vec<f64> {
        self.window.clear();
        values.iter().map(|&v| self.apply(v)).collect()
    }

    /// Normalized Hann weights: 0.5 - 0.5 * cos(2πi / (length + 1)), i = 1..=length
    ///
    /// The endpoints of the textbook window are zero, so the window is
    /// shifted by one sample on each side to give every input some weight.
    fn compute_hann_weights(length: usize) -> Vec<f64> {
        if length <= 1 {
            return vec![1.0];
        }

        let mut weights: Vec<f64> = (1..=length)
            .map(|i| {
                let angle = (2.0 * std::f64::consts::PI * i as f64) / (length as f64 + 1.0);
                0.5 - 0.5 * angle.cos()
            })
            .collect();

        let sum: f64 = weights.iter().sum();
        let total = if sum > 0.0 { sum } else { 1.0 };
        weights.iter_mut().for_each(|w| *w /= total);
        weights
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_value() {
        let mut smoother = HannSmoother::new(5);
        assert_eq!(smoother.apply(5.0), 5.0);
    }

    #[test]
    fn test_two_values_are_averaged() {
        let mut smoother = HannSmoother::new(5);
        smoother.apply(2.0);
        let result = smoother.apply(4.0);
        assert!((result - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_constant_series_unchanged() {
        let mut smoother = HannSmoother::new(5);
        let out = smoother.smooth_series(&[2.5; 12]);
        assert!(out.iter().all(|v| (v - 2.5).abs() < 1e-12));
    }

    #[test]
    fn test_window_wrapping() {
        let mut smoother = HannSmoother::new(2);
        smoother.apply(1.0);
        smoother.apply(2.0);
        let result = smoother.apply(3.0);
        assert_eq!(smoother.len(), 2);
        assert!((result - 2.5).abs() < 1e-12);
    }

    #[test]
    fn test_smoothing_reduces_alternating_noise() {
        let mut smoother = HannSmoother::new(5);
        let noisy: Vec<f64> = (0..40).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        let out = smoother.smooth_series(&noisy);
        let tail_peak = out[10..].iter().fold(0.0_f64, |m, v| m.max(v.abs()));
        assert!(tail_peak < 0.5);
    }
}
