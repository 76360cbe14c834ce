//! Real-time sensor fusion for on-foot tracking: barometric/GPS altitude,
//! smoothed position, grade, terrain detection from motion, and adaptive
//! location sampling.

pub mod config;
pub mod error;
pub mod filters;
pub mod grade;
pub mod health_monitor;
pub mod sampling;
pub mod sensors;
pub mod session;
pub mod smoothing;
pub mod telemetry;
pub mod terrain;
pub mod types;

pub use config::TrackerConfig;
pub use error::{Result, TrackerError};
pub use session::{LocationOutcome, TerrainEvent, TrackingSession};
pub use types::{BarometerSample, ContextHint, LocationFix, SensorSample, TerrainClassification, TerrainType};
