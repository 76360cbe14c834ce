//! Terrain detection: motion features, reference signatures, the classifier
//! and the fusion arbiter that feeds the calorie engine.

pub mod arbiter;
pub mod classifier;
pub mod features;
pub mod signature;

pub use arbiter::{terrain_factor, TerrainArbiter, TerrainFactorUpdate};
pub use classifier::{AnalysisStatus, ClassifierResult, MotionClassifier};
pub use features::{extract_features, FeatureExtraction, MotionFeatures, StepMethod};
pub use signature::{match_features, FeatureRange, TerrainSignature, REFERENCE_SIGNATURES};
