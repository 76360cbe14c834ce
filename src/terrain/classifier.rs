use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use super::features::{extract_features, MotionFeatures, StepMethod};
use super::signature::{match_features, TerrainSignature, REFERENCE_SIGNATURES};
use crate::config::ClassifierConfig;
use crate::types::{DetectionMethod, SensorSample, TerrainClassification, TerrainType};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum AnalysisStatus {
    Fresh,
    /// Served from the previous cycle
    Cached,
    InsufficientData { have: usize, need: usize },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassifierResult {
    pub classification: TerrainClassification,
    pub features: Option<MotionFeatures>,
    pub step_method: StepMethod,
    pub scores: Vec<(TerrainType, f64)>,
    pub status: AnalysisStatus,
}

/// Scores buffered inertial motion against terrain reference signatures.
///
/// Analysis is rate limited: a result is recomputed only when new samples
/// arrived and at least `analysis_interval_secs` of sample time has passed
/// since the last run. Callers share one classifier behind a mutex, so
/// concurrent requests during a cycle all read the same cached result.
pub struct MotionClassifier {
    config: ClassifierConfig,
    signatures: Vec<TerrainSignature>,
    buffer: VecDeque<SensorSample>,
    fresh_samples: usize,
    dropped: u64,
    last_analysis: Option<f64>,
    cached: Option<ClassifierResult>,
}

impl MotionClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self::with_signatures(config, REFERENCE_SIGNATURES.to_vec())
    }

    pub fn with_signatures(config: ClassifierConfig, signatures: Vec<TerrainSignature>) -> Self {
        Self {
            buffer: VecDeque::with_capacity(config.buffer_capacity),
            signatures,
            fresh_samples: 0,
            dropped: 0,
            last_analysis: None,
            cached: None,
            config,
        }
    }

    /// Append one sample, evicting the oldest when full. Non-finite or
    /// out-of-order samples are dropped.
    pub fn push_sample(&mut self, sample: SensorSample) -> bool {
        let finite = sample.timestamp.is_finite()
            && sample.accel_magnitude().is_finite()
            && sample.rotation_magnitude().is_finite();
        let ordered = self.buffer.back().map_or(true, |last| sample.timestamp > last.timestamp);
        if !finite || !ordered {
            self.dropped += 1;
            return false;
        }

        if self.buffer.len() == self.config.buffer_capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(sample);
        self.fresh_samples += 1;
        true
    }

    pub fn analyze(&mut self) -> ClassifierResult {
        let now = self.buffer.back().map(|s| s.timestamp).unwrap_or(0.0);

        if self.buffer.len() < self.config.min_samples {
            return ClassifierResult {
                classification: TerrainClassification::new(
                    TerrainType::Pavement,
                    0.0,
                    now,
                    DetectionMethod::MotionSignature,
                ),
                features: None,
                step_method: StepMethod::None,
                scores: Vec::new(),
                status: AnalysisStatus::InsufficientData {
                    have: self.buffer.len(),
                    need: self.config.min_samples,
                },
            };
        }

        if let Some(cached) = &self.cached {
            let too_soon = self
                .last_analysis
                .map_or(false, |t| now - t < self.config.analysis_interval_secs);
            if self.fresh_samples == 0 || too_soon {
                let mut result = cached.clone();
                result.status = AnalysisStatus::Cached;
                return result;
            }
        }

        let result = self.compute(now);
        self.fresh_samples = 0;
        self.last_analysis = Some(now);
        self.cached = Some(result.clone());
        result
    }

    fn compute(&self, now: f64) -> ClassifierResult {
        let samples: Vec<SensorSample> = self.buffer.iter().copied().collect();
        let Some(extraction) = extract_features(&samples, &self.config) else {
            log::debug!("classifier: window has no usable time span");
            return ClassifierResult {
                classification: TerrainClassification::new(
                    TerrainType::Pavement,
                    0.0,
                    now,
                    DetectionMethod::MotionSignature,
                ),
                features: None,
                step_method: StepMethod::None,
                scores: Vec::new(),
                status: AnalysisStatus::Fresh,
            };
        };

        let (terrain, confidence, scores) = match_features(&extraction.features, &self.signatures);
        log::debug!(
            "classifier: {} at {:.2} (cadence {:.2} Hz via {:?}, {:.1} Hz sampling)",
            terrain.name(),
            confidence,
            extraction.features.step_frequency_hz,
            extraction.step_method,
            extraction.sample_rate_hz
        );

        ClassifierResult {
            classification: TerrainClassification::new(terrain, confidence, now, DetectionMethod::MotionSignature),
            features: Some(extraction.features),
            step_method: extraction.step_method,
            scores,
            status: AnalysisStatus::Fresh,
        }
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.fresh_samples = 0;
        self.last_analysis = None;
        self.cached = None;
    }
}
