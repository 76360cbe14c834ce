//! Synthetic sensor feeds for running the pipeline without hardware
//!
//! Every reading is a pure function of time since the feed started, so a
//! run is reproducible. Noise is built from incommensurate sinusoids.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::Sender;
use tokio::sync::watch;
use tokio::time::{interval, Duration, Instant};

use crate::sampling::{ConfigurationListener, SamplingConfiguration};
use crate::types::{BarometerSample, LocationFix, SensorSample};

const METERS_PER_DEGREE: f64 = 111_320.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    /// Phone lying on a table
    Stationary,
    /// Brisk walk on flat pavement
    Walk,
    /// Slower climb on a trail at 8% grade
    Hike,
}

fn jitter(t: f64, seed: f64, amplitude: f64) -> f64 {
    amplitude * (t * 37.13 + seed).sin() * (t * 11.71 + 2.0 * seed).cos()
}

#[derive(Clone, Copy, Debug)]
pub struct SyntheticTrack {
    pub scenario: Scenario,
    pub origin: (f64, f64),
    pub base_altitude: f64,
}

impl SyntheticTrack {
    pub fn new(scenario: Scenario) -> Self {
        Self {
            scenario,
            origin: (46.5197, 6.6323),
            base_altitude: 420.0,
        }
    }

    fn speed(&self) -> f64 {
        match self.scenario {
            Scenario::Stationary => 0.0,
            Scenario::Walk => 1.4,
            Scenario::Hike => 1.1,
        }
    }

    fn cadence(&self) -> f64 {
        match self.scenario {
            Scenario::Stationary => 0.0,
            Scenario::Walk => 1.9,
            Scenario::Hike => 1.6,
        }
    }

    fn grade(&self) -> f64 {
        match self.scenario {
            Scenario::Hike => 0.08,
            _ => 0.0,
        }
    }

    fn distance(&self, t: f64) -> f64 {
        self.speed() * t
    }

    pub fn inertial(&self, t: f64) -> SensorSample {
        let noise = (jitter(t, 0.3, 0.004), jitter(t, 1.1, 0.004), jitter(t, 2.7, 0.004));
        let gyro_noise = (jitter(t, 0.9, 0.002), jitter(t, 1.9, 0.002), jitter(t, 0.1, 0.002));
        if self.scenario == Scenario::Stationary {
            return SensorSample::new(t, noise, gyro_noise);
        }

        let (amplitude, sway, turn) = match self.scenario {
            Scenario::Hike => (0.22, 0.09, 0.45),
            _ => (0.18, 0.06, 0.25),
        };
        let phase = 2.0 * PI * self.cadence() * t;
        let vertical = amplitude * phase.sin() + 0.25 * amplitude * (2.0 * phase).sin();
        SensorSample::new(
            t,
            (sway * (0.5 * phase).sin() + noise.0, 0.4 * sway * phase.cos() + noise.1, vertical + noise.2),
            (
                turn * (0.5 * phase).sin() + gyro_noise.0,
                0.6 * turn * phase.cos() + gyro_noise.1,
                0.3 * turn * (0.5 * phase).cos() + gyro_noise.2,
            ),
        )
    }

    /// Heading due north from the origin
    pub fn location(&self, t: f64) -> LocationFix {
        let distance = self.distance(t);
        let north = distance + jitter(t, 4.2, 2.0);
        let east = jitter(t, 5.3, 2.0);
        LocationFix {
            timestamp: t,
            latitude: self.origin.0 + north / METERS_PER_DEGREE,
            longitude: self.origin.1 + east / (METERS_PER_DEGREE * self.origin.0.to_radians().cos()),
            altitude: self.base_altitude + self.grade() * distance + jitter(t, 6.1, 3.0),
            horizontal_accuracy: 5.0,
            vertical_accuracy: 8.0,
            speed: if self.scenario == Scenario::Stationary {
                0.0
            } else {
                self.speed() + jitter(t, 7.7, 0.1)
            },
            course: 0.0,
        }
    }

    pub fn barometer(&self, t: f64) -> BarometerSample {
        let relative = self.grade() * self.distance(t) + jitter(t, 8.3, 0.05);
        let absolute = self.base_altitude + relative;
        BarometerSample {
            timestamp: t,
            relative_altitude: relative,
            pressure_hpa: 1013.25 * (1.0 - 2.25577e-5 * absolute).powf(5.25588),
        }
    }
}

/// Forward sampling changes to the location feed's interval
pub struct IntervalListener {
    interval: watch::Sender<f64>,
}

impl IntervalListener {
    pub fn new(initial_secs: f64) -> (Self, watch::Receiver<f64>) {
        let (interval, rx) = watch::channel(initial_secs);
        (Self { interval }, rx)
    }
}

impl ConfigurationListener for IntervalListener {
    fn on_configuration_changed(&self, configuration: &SamplingConfiguration) {
        self.interval.send_replace(configuration.update_interval_secs);
    }
}

/// Returns false once the receiving side has gone away
fn offer<T>(tx: &Sender<T>, item: T, name: &str, count: &mut u64) -> bool {
    match tx.try_send(item) {
        Ok(_) => {
            *count += 1;
            true
        }
        Err(TrySendError::Closed(_)) => {
            log::info!("[{}] channel closed after {} samples", name, count);
            false
        }
        // Channel full, drop this sample
        Err(TrySendError::Full(_)) => true,
    }
}

pub async fn inertial_loop(tx: Sender<SensorSample>, track: SyntheticTrack, rate_hz: f64, start: Instant) {
    let mut ticker = interval(Duration::from_secs_f64(1.0 / rate_hz.max(1.0)));
    let mut count = 0u64;
    loop {
        ticker.tick().await;
        let t = start.elapsed().as_secs_f64();
        if !offer(&tx, track.inertial(t), "inertial", &mut count) {
            break;
        }
        if count % 500 == 0 {
            log::debug!("[inertial] {} samples", count);
        }
    }
}

pub async fn barometer_loop(tx: Sender<BarometerSample>, track: SyntheticTrack, start: Instant) {
    let mut ticker = interval(Duration::from_secs(1));
    let mut count = 0u64;
    loop {
        ticker.tick().await;
        let t = start.elapsed().as_secs_f64();
        if !offer(&tx, track.barometer(t), "barometer", &mut count) {
            break;
        }
    }
}

/// Emits fixes at whatever interval the sampling controller last chose
pub async fn location_loop(
    tx: Sender<LocationFix>,
    track: SyntheticTrack,
    start: Instant,
    mut update_interval: watch::Receiver<f64>,
) {
    let mut count = 0u64;
    loop {
        let t = start.elapsed().as_secs_f64();
        if !offer(&tx, track.location(t), "location", &mut count) {
            break;
        }
        let wait = Duration::from_secs_f64(update_interval.borrow_and_update().max(0.1));
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            changed = update_interval.changed() => {
                if changed.is_err() {
                    break;
                }
                log::debug!("[location] interval now {:.0}s", *update_interval.borrow());
            }
        }
    }
}
