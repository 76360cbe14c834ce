pub mod altitude;
pub mod position;

pub use altitude::{AltitudeEstimate, AltitudeEstimator, QualityReport};
pub use position::{haversine_distance, PositionEstimate, PositionSmoother, SmootherUpdate};
