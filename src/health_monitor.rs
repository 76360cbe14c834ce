use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::time::{Duration, Instant};

use crate::config::SessionConfig;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum SensorStatus {
    /// No data yet, still inside the silence threshold
    Waiting,
    Healthy,
    Silent { secs: f64 },
    /// Never reported within the threshold; treated as absent hardware
    Unavailable,
}

impl SensorStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, SensorStatus::Healthy)
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, SensorStatus::Silent { .. } | SensorStatus::Unavailable)
    }
}

/// Tracks arrivals for one sensor stream
#[derive(Debug)]
pub struct SensorHealth {
    pub name: String,
    pub silence_threshold: Duration,
    created: Instant,
    last_update: Mutex<Option<Instant>>,
    samples: Mutex<u64>,
}

impl SensorHealth {
    pub fn new(name: &str, silence_threshold_secs: f64) -> Self {
        SensorHealth {
            name: name.to_string(),
            silence_threshold: Duration::from_secs_f64(silence_threshold_secs.max(0.0)),
            created: Instant::now(),
            last_update: Mutex::new(None),
            samples: Mutex::new(0),
        }
    }

    pub fn update(&self) {
        if let Ok(mut time) = self.last_update.lock() {
            *time = Some(Instant::now());
        }
        if let Ok(mut count) = self.samples.lock() {
            *count += 1;
        }
    }

    pub fn time_since_last_update(&self) -> Option<Duration> {
        self.last_update.lock().ok().and_then(|t| t.map(|t| t.elapsed()))
    }

    pub fn sample_count(&self) -> u64 {
        self.samples.lock().map(|c| *c).unwrap_or(0)
    }

    pub fn status(&self) -> SensorStatus {
        match self.time_since_last_update() {
            Some(d) if d > self.silence_threshold => SensorStatus::Silent { secs: d.as_secs_f64() },
            Some(_) => SensorStatus::Healthy,
            None if self.created.elapsed() > self.silence_threshold => SensorStatus::Unavailable,
            None => SensorStatus::Waiting,
        }
    }
}

/// Liveness of the three input streams of a session
#[derive(Debug)]
pub struct HealthMonitor {
    pub inertial: SensorHealth,
    pub location: SensorHealth,
    pub barometer: SensorHealth,
}

impl HealthMonitor {
    pub fn new(config: &SessionConfig) -> Self {
        HealthMonitor {
            inertial: SensorHealth::new("Inertial", config.inertial_silence_secs),
            location: SensorHealth::new("Location", config.location_silence_secs),
            barometer: SensorHealth::new("Barometer", config.barometer_silence_secs),
        }
    }

    pub fn check_health(&self) -> HealthReport {
        HealthReport {
            inertial: self.inertial.status(),
            location: self.location.status(),
            barometer: self.barometer.status(),
        }
    }

    /// Format health status for logging
    pub fn format_status(&self) -> String {
        let report = self.check_health();
        let describe = |status: SensorStatus| match status {
            SensorStatus::Healthy => "ok".to_string(),
            SensorStatus::Waiting => "waiting".to_string(),
            SensorStatus::Silent { secs } => format!("silent {:.1}s", secs),
            SensorStatus::Unavailable => "unavailable".to_string(),
        };
        format!(
            "Health: Inertial {} | Location {} | Barometer {}",
            describe(report.inertial),
            describe(report.location),
            describe(report.barometer)
        )
    }
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new(&SessionConfig::default())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub inertial: SensorStatus,
    pub location: SensorStatus,
    pub barometer: SensorStatus,
}

impl HealthReport {
    /// Barometer has produced data recently enough to lead the altitude filter
    pub fn barometer_usable(&self) -> bool {
        self.barometer.is_healthy()
    }
}
