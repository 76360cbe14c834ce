use thiserror::Error;

/// Tracker error types
///
/// Only `InvalidConfig` is fatal. The sensor-side variants describe why a
/// component fell back to a conservative result; they are carried on
/// `TerrainEvent::DetectionDegraded` rather than returned to callers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrackerError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Sensor unavailable: {0}")]
    SensorUnavailable(String),

    #[error("Insufficient data: have {have} samples, need {need}")]
    InsufficientData { have: usize, need: usize },

    #[error("Numerically degenerate: {0}")]
    NumericDegenerate(String),

    #[error("Session stopped")]
    SessionStopped,
}

/// Result type for tracker operations
pub type Result<T> = std::result::Result<T, TrackerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let errors = vec![
            TrackerError::InvalidConfig("buffer".to_string()),
            TrackerError::SensorUnavailable("barometer".to_string()),
            TrackerError::InsufficientData { have: 3, need: 30 },
            TrackerError::NumericDegenerate("singular".to_string()),
            TrackerError::SessionStopped,
        ];

        for err in errors {
            assert!(!err.to_string().is_empty());
        }

        let err = TrackerError::InsufficientData { have: 3, need: 30 };
        assert_eq!(err.to_string(), "Insufficient data: have 3 samples, need 30");
    }
}
