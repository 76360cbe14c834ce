//! One tracking session: owns every component, fans sensor input out to
//! them and runs the periodic terrain detection task.
//!
//! Components sit behind async mutexes and are only reached through the
//! session's methods. No method holds two component locks at once.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};

use crate::config::TrackerConfig;
use crate::error::{Result, TrackerError};
use crate::filters::{AltitudeEstimate, AltitudeEstimator, PositionEstimate, PositionSmoother, QualityReport, SmootherUpdate};
use crate::grade::{GradeAggregator, GradeReading};
use crate::health_monitor::{HealthMonitor, HealthReport, SensorStatus};
use crate::sampling::{ConfigurationListener, ListenerId, SamplingConfiguration, SamplingController};
use crate::telemetry::{wall_clock_now, TelemetrySummary};
use crate::terrain::{terrain_factor, AnalysisStatus, ClassifierResult, MotionClassifier, TerrainArbiter, TerrainFactorUpdate};
use crate::types::{BarometerSample, ContextHint, LocationFix, SensorSample, TerrainClassification, TerrainType};

/// Pushed to subscribers of the terrain stream
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum TerrainEvent {
    Factor(TerrainFactorUpdate),
    /// Detection continues on fallbacks; consumers may want to show it
    DetectionDegraded { reason: String, timestamp: f64 },
}

/// Result of feeding one location fix through the pipeline
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LocationOutcome {
    pub smoother: SmootherUpdate,
    pub altitude: AltitudeEstimate,
    pub grade_point_accepted: bool,
    /// New sampling configuration, if this fix triggered one
    pub sampling_change: Option<SamplingConfiguration>,
}

/// Altitude filter plus the offset that turns relative barometric altitude
/// into absolute elevation
struct AltitudeChannel {
    estimator: AltitudeEstimator,
    baro_offset: Option<f64>,
    last_relative: Option<f64>,
}

#[derive(Default)]
struct Counters {
    inertial: AtomicU64,
    location: AtomicU64,
    barometer: AtomicU64,
}

struct Shared {
    config: TrackerConfig,
    altitude: Mutex<AltitudeChannel>,
    smoother: Mutex<PositionSmoother>,
    grade: Mutex<GradeAggregator>,
    classifier: Mutex<MotionClassifier>,
    arbiter: Mutex<TerrainArbiter>,
    sampler: Mutex<SamplingController>,
    health: HealthMonitor,
    events: broadcast::Sender<TerrainEvent>,
    last_result: Mutex<Option<ClassifierResult>>,
    degraded: AtomicBool,
    counters: Counters,
    sensor_time: StdMutex<f64>,
}

impl Shared {
    fn advance_clock(&self, timestamp: f64) {
        if !timestamp.is_finite() {
            return;
        }
        if let Ok(mut now) = self.sensor_time.lock() {
            if timestamp > *now {
                *now = timestamp;
            }
        }
    }

    fn sensor_time(&self) -> f64 {
        self.sensor_time.lock().map(|t| *t).unwrap_or(0.0)
    }

    async fn ingest_inertial(&self, sample: SensorSample) -> bool {
        self.health.inertial.update();
        self.counters.inertial.fetch_add(1, Ordering::Relaxed);
        self.advance_clock(sample.timestamp);
        self.classifier.lock().await.push_sample(sample)
    }

    async fn ingest_barometer(&self, sample: BarometerSample) -> Option<f64> {
        self.health.barometer.update();
        self.counters.barometer.fetch_add(1, Ordering::Relaxed);
        self.advance_clock(sample.timestamp);

        let mut channel = self.altitude.lock().await;
        channel.last_relative = Some(sample.relative_altitude);
        let offset = channel.baro_offset?;
        Some(
            channel
                .estimator
                .process_measurement(sample.relative_altitude + offset, sample.pressure_hpa, sample.timestamp),
        )
    }

    async fn ingest_location(&self, fix: LocationFix) -> LocationOutcome {
        self.health.location.update();
        self.counters.location.fetch_add(1, Ordering::Relaxed);
        self.advance_clock(fix.timestamp);
        let barometer_live = self.health.check_health().barometer_usable();

        let smooth = async {
            let mut smoother = self.smoother.lock().await;
            let update = smoother.update(&fix);
            (update, smoother.distance_m())
        };
        let altitude = async {
            let mut channel = self.altitude.lock().await;
            if fix.has_valid_altitude() {
                if channel.baro_offset.is_none() {
                    let offset = fix.altitude - channel.last_relative.unwrap_or(0.0);
                    channel.baro_offset = Some(offset);
                    log::info!("Barometric altitude anchored at {:.1} m", offset);
                }
                if barometer_live && channel.estimator.is_initialized() {
                    channel
                        .estimator
                        .update_gps_altitude(fix.altitude, fix.vertical_accuracy, fix.timestamp);
                } else {
                    channel
                        .estimator
                        .process_gps_only(fix.altitude, fix.vertical_accuracy, fix.timestamp);
                }
            } else {
                channel.estimator.predict(fix.timestamp);
            }
            (channel.estimator.estimate(), channel.estimator.measurement_confidence())
        };
        let ((smoother, distance), (altitude, altitude_confidence)) = tokio::join!(smooth, altitude);
        if smoother == SmootherUpdate::Degenerate {
            log::warn!(
                "{} at t={:.1}, correction skipped",
                TrackerError::NumericDegenerate("singular innovation covariance".to_string()),
                fix.timestamp
            );
        }

        let grade_point_accepted = match smoother {
            SmootherUpdate::Ignored => false,
            _ if altitude.last_update.is_none() => false,
            _ => self.grade.lock().await.add_point(
                altitude.altitude,
                distance,
                altitude_confidence,
                fix.timestamp,
            ),
        };

        let sampling_change = self.sampler.lock().await.ingest(&fix);

        LocationOutcome {
            smoother,
            altitude,
            grade_point_accepted,
            sampling_change,
        }
    }

    /// One detection cycle: classify, fuse, gate, publish.
    async fn detect_once(&self) -> Option<TerrainFactorUpdate> {
        let now = self.sensor_time();
        self.check_degraded(now);

        let result = self.classifier.lock().await.analyze();
        let motion = match result.status {
            AnalysisStatus::InsufficientData { have, need } => {
                log::debug!("Terrain detection waiting: {}", TrackerError::InsufficientData { have, need });
                None
            }
            _ => Some(result.classification),
        };
        *self.last_result.lock().await = Some(result);

        let (decision, gated) = {
            let mut arbiter = self.arbiter.lock().await;
            let decision = arbiter.fuse(motion.as_ref(), now);
            let gated = arbiter.gate(&decision);
            (decision, gated)
        };

        if let Some(update) = gated {
            log::info!(
                "Terrain {} at {:.0}% -> factor {:.3}",
                update.terrain.name(),
                update.confidence * 100.0,
                update.terrain_factor
            );
            // No subscribers is not an error
            let _ = self.events.send(TerrainEvent::Factor(update));
        }

        self.sampler.lock().await.note_terrain(decision.terrain, decision.confidence);
        gated
    }

    /// Publish a degraded event when the inertial stream goes quiet, once
    /// per outage.
    fn check_degraded(&self, now: f64) {
        let status = self.health.inertial.status();
        if status.is_degraded() {
            if !self.degraded.swap(true, Ordering::Relaxed) {
                let detail = match status {
                    SensorStatus::Silent { secs } => format!("inertial sensor silent for {:.1}s", secs),
                    _ => "inertial sensor never reported".to_string(),
                };
                let reason = TrackerError::SensorUnavailable(detail).to_string();
                log::warn!("Terrain detection degraded: {}", reason);
                let _ = self.events.send(TerrainEvent::DetectionDegraded { reason, timestamp: now });
            }
        } else if status.is_healthy() && self.degraded.swap(false, Ordering::Relaxed) {
            log::info!("Inertial sensor recovered, terrain detection resumed");
        }
    }
}

pub struct TrackingSession {
    shared: Arc<Shared>,
    shutdown: watch::Sender<bool>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl TrackingSession {
    /// Build every component from a validated configuration.
    pub fn new(config: TrackerConfig) -> Result<Self> {
        config.validate()?;
        let (events, _) = broadcast::channel(config.session.event_capacity);
        let (shutdown, _) = watch::channel(false);

        let shared = Shared {
            altitude: Mutex::new(AltitudeChannel {
                estimator: AltitudeEstimator::new(config.altitude.clone()),
                baro_offset: None,
                last_relative: None,
            }),
            smoother: Mutex::new(PositionSmoother::new(config.smoother.clone())),
            grade: Mutex::new(GradeAggregator::new(config.grade.clone())),
            classifier: Mutex::new(MotionClassifier::new(config.classifier.clone())),
            arbiter: Mutex::new(TerrainArbiter::new(config.arbiter.clone())),
            sampler: Mutex::new(SamplingController::new(config.sampling.clone())),
            health: HealthMonitor::new(&config.session),
            events,
            last_result: Mutex::new(None),
            degraded: AtomicBool::new(false),
            counters: Counters::default(),
            sensor_time: StdMutex::new(0.0),
            config,
        };

        Ok(Self {
            shared: Arc::new(shared),
            shutdown,
            tasks: StdMutex::new(Vec::new()),
            started: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.shared.config
    }

    fn ensure_running(&self) -> Result<()> {
        if *self.shutdown.borrow() {
            Err(TrackerError::SessionStopped)
        } else {
            Ok(())
        }
    }

    fn track(&self, handle: JoinHandle<()>) {
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.push(handle);
        }
    }

    // ── Input ──

    pub async fn ingest_inertial(&self, sample: SensorSample) -> bool {
        self.shared.ingest_inertial(sample).await
    }

    /// Returns the filtered altitude, or `None` until a location fix has
    /// anchored the barometer to absolute elevation.
    pub async fn ingest_barometer(&self, sample: BarometerSample) -> Option<f64> {
        self.shared.ingest_barometer(sample).await
    }

    pub async fn ingest_location(&self, fix: LocationFix) -> LocationOutcome {
        self.shared.ingest_location(fix).await
    }

    /// Reset altitude to a surveyed elevation
    pub async fn calibrate_altitude(&self, known_elevation: f64, reference_pressure: f64) {
        let mut channel = self.shared.altitude.lock().await;
        channel.estimator.calibrate(known_elevation, reference_pressure);
        channel.baro_offset = Some(known_elevation - channel.last_relative.unwrap_or(0.0));
    }

    pub async fn update_power(&self, battery: f64, power_saving: bool) -> Option<SamplingConfiguration> {
        self.shared.sampler.lock().await.update_power(battery, power_saving)
    }

    pub async fn set_context_hint(&self, hint: Option<ContextHint>) {
        self.shared.arbiter.lock().await.set_context_hint(hint);
    }

    /// Takes effect on the next detection cycle
    pub async fn set_manual_override(&self, terrain: Option<TerrainType>) {
        self.shared.arbiter.lock().await.set_manual_override(terrain);
    }

    pub async fn set_adaptive_mode(&self, enabled: bool) -> Option<SamplingConfiguration> {
        self.shared.sampler.lock().await.set_adaptive_mode(enabled)
    }

    pub async fn set_battery_optimization(&self, enabled: bool) -> Option<SamplingConfiguration> {
        self.shared.sampler.lock().await.set_battery_optimization(enabled)
    }

    pub async fn force_reconfigure(&self) -> Option<SamplingConfiguration> {
        self.shared.sampler.lock().await.force_reconfigure()
    }

    pub async fn register_listener(&self, listener: &Arc<dyn ConfigurationListener>) -> ListenerId {
        self.shared.sampler.lock().await.register_listener(listener)
    }

    pub async fn deregister_listener(&self, id: ListenerId) -> bool {
        self.shared.sampler.lock().await.deregister_listener(id)
    }

    // ── Snapshots ──

    pub async fn altitude(&self) -> AltitudeEstimate {
        self.shared.altitude.lock().await.estimator.estimate()
    }

    pub async fn altitude_quality(&self) -> QualityReport {
        let now = self.shared.sensor_time();
        self.shared.altitude.lock().await.estimator.assess_quality(now)
    }

    pub async fn position(&self) -> Option<PositionEstimate> {
        self.shared.smoother.lock().await.estimate()
    }

    pub async fn grade(&self) -> GradeReading {
        self.shared.grade.lock().await.reading()
    }

    pub async fn grade_energy_multiplier(&self) -> f64 {
        let grade = self.shared.grade.lock().await;
        grade.grade_energy_multiplier(grade.reading().smoothed_percent)
    }

    pub async fn terrain(&self) -> Option<TerrainClassification> {
        self.shared.arbiter.lock().await.current().copied()
    }

    pub async fn last_classifier_result(&self) -> Option<ClassifierResult> {
        self.shared.last_result.lock().await.clone()
    }

    pub async fn sampling_configuration(&self) -> SamplingConfiguration {
        self.shared.sampler.lock().await.recommended_configuration()
    }

    pub fn health(&self) -> HealthReport {
        self.shared.health.check_health()
    }

    /// One-line sensor liveness for status logs
    pub fn health_status(&self) -> String {
        self.shared.health.format_status()
    }

    pub async fn telemetry(&self) -> TelemetrySummary {
        let altitude = self.altitude().await;
        let quality = self.altitude_quality().await;
        let (altitude_measurements, reference_pressure_hpa) = {
            let channel = self.shared.altitude.lock().await;
            (channel.estimator.measurement_count(), channel.estimator.reference_pressure())
        };
        let grade = self.grade().await;
        let position = self.position().await;
        let terrain = self.terrain().await;
        let (preset, pattern, drain) = {
            let sampler = self.shared.sampler.lock().await;
            (
                sampler.recommended_configuration().preset,
                sampler.movement_pattern(),
                sampler.estimated_battery_drain(),
            )
        };
        let counters = &self.shared.counters;

        TelemetrySummary {
            generated_at: wall_clock_now(),
            sensor_time: self.shared.sensor_time(),
            inertial_samples: counters.inertial.load(Ordering::Relaxed),
            location_fixes: counters.location.load(Ordering::Relaxed),
            barometer_samples: counters.barometer.load(Ordering::Relaxed),
            altitude_m: altitude.altitude,
            altitude_uncertainty: altitude.uncertainty,
            altitude_quality: quality.score,
            altitude_measurements,
            reference_pressure_hpa,
            grade_percent: grade.smoothed_percent,
            grade_confidence: grade.confidence,
            elevation_gain_m: grade.gain_m,
            elevation_loss_m: grade.loss_m,
            distance_m: position.map(|p| p.distance_m).unwrap_or(0.0),
            speed_mps: position.map(|p| p.speed_mps).unwrap_or(0.0),
            terrain: terrain.map(|t| t.terrain),
            terrain_confidence: terrain.map(|t| t.confidence).unwrap_or(0.0),
            terrain_factor: terrain.map(|t| terrain_factor(t.terrain, t.confidence)).unwrap_or(1.0),
            detection_method: terrain.map(|t| t.method),
            manual_override: terrain.map(|t| t.manual_override).unwrap_or(false),
            sampling_preset: preset,
            movement_pattern: pattern,
            estimated_drain_pct_per_hour: drain,
            health: self.health(),
        }
    }

    // ── Detection ──

    /// Run one detection cycle now, outside the periodic task. Returns the
    /// update if the gate let one through.
    pub async fn run_detection_cycle(&self) -> Option<TerrainFactorUpdate> {
        self.shared.detect_once().await
    }

    /// Gated terrain events. Ends when the session stops.
    pub fn subscribe(&self) -> impl Stream<Item = TerrainEvent> + Send + 'static {
        let events = self.shared.events.subscribe();
        let shutdown = self.shutdown.subscribe();

        stream::unfold((events, shutdown), |(mut events, mut shutdown)| async move {
            loop {
                if *shutdown.borrow() {
                    return None;
                }
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            return None;
                        }
                    }
                    received = events.recv() => match received {
                        Ok(event) => return Some((event, (events, shutdown))),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            log::warn!("Terrain subscriber lagged, skipped {} events", skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    },
                }
            }
        })
    }

    /// Spawn the periodic detection task. Calling it twice is a no-op.
    pub fn start(&self) -> Result<()> {
        self.ensure_running()?;
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let shared = Arc::clone(&self.shared);
        let mut shutdown = self.shutdown.subscribe();
        let period = Duration::from_secs_f64(shared.config.session.detection_interval_secs);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            log::info!("Terrain detection started ({:.1}s cycle)", period.as_secs_f64());
            loop {
                if *shutdown.borrow() {
                    break;
                }
                tokio::select! {
                    _ = shutdown.changed() => {}
                    _ = ticker.tick() => {
                        shared.detect_once().await;
                    }
                }
            }
            log::info!("Terrain detection stopped");
        });
        self.track(handle);
        Ok(())
    }

    fn attach_feed<T, F, Fut>(&self, name: &'static str, mut feed: mpsc::Receiver<T>, handler: F) -> Result<()>
    where
        T: Send + 'static,
        F: Fn(Arc<Shared>, T) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.ensure_running()?;
        let shared = Arc::clone(&self.shared);
        let mut shutdown = self.shutdown.subscribe();

        let handle = tokio::spawn(async move {
            loop {
                if *shutdown.borrow() {
                    break;
                }
                tokio::select! {
                    _ = shutdown.changed() => {}
                    item = feed.recv() => match item {
                        Some(item) => handler(Arc::clone(&shared), item).await,
                        None => {
                            log::info!("{} feed closed", name);
                            break;
                        }
                    },
                }
            }
            // Dropping the receiver releases the producer
            drop(feed);
        });
        self.track(handle);
        Ok(())
    }

    pub fn attach_inertial_feed(&self, feed: mpsc::Receiver<SensorSample>) -> Result<()> {
        self.attach_feed("Inertial", feed, |shared, sample| async move {
            shared.ingest_inertial(sample).await;
        })
    }

    pub fn attach_location_feed(&self, feed: mpsc::Receiver<LocationFix>) -> Result<()> {
        self.attach_feed("Location", feed, |shared, fix| async move {
            shared.ingest_location(fix).await;
        })
    }

    pub fn attach_barometer_feed(&self, feed: mpsc::Receiver<BarometerSample>) -> Result<()> {
        self.attach_feed("Barometer", feed, |shared, sample| async move {
            shared.ingest_barometer(sample).await;
        })
    }

    /// Cancel the detection task and every attached feed, then wait for them.
    pub async fn stop(&self) {
        self.shutdown.send_replace(true);
        let handles = match self.tasks.lock() {
            Ok(mut tasks) => std::mem::take(&mut *tasks),
            Err(_) => Vec::new(),
        };
        for handle in handles {
            if let Err(e) = handle.await {
                log::warn!("Session task ended abnormally: {}", e);
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        *self.shutdown.borrow()
    }
}

impl Drop for TrackingSession {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn fix(timestamp: f64, latitude: f64, altitude: f64, speed: f64) -> LocationFix {
        LocationFix {
            timestamp,
            latitude,
            longitude: 8.5,
            altitude,
            horizontal_accuracy: 5.0,
            vertical_accuracy: 6.0,
            speed,
            course: 0.0,
        }
    }

    #[test]
    fn test_invalid_config_is_fatal() {
        let mut config = TrackerConfig::default();
        config.classifier.buffer_capacity = 0;
        assert!(matches!(TrackingSession::new(config), Err(TrackerError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_location_without_barometer_uses_gps_altitude() {
        let session = TrackingSession::new(TrackerConfig::default()).unwrap();
        let outcome = session.ingest_location(fix(0.0, 47.0, 500.0, 1.2)).await;
        assert_eq!(outcome.smoother, SmootherUpdate::Initialized);
        assert_eq!(outcome.altitude.altitude, 500.0);
        assert!(session.position().await.is_some());
    }

    #[tokio::test]
    async fn test_gps_only_climb_still_produces_grade() {
        let session = TrackingSession::new(TrackerConfig::default()).unwrap();
        let mut accepted = 0;
        for i in 0..300 {
            let t = i as f64;
            let north = 1.1 * t;
            let outcome = session
                .ingest_location(fix(t, 47.0 + north / 111_320.0, 400.0 + 0.08 * north, 1.1))
                .await;
            if outcome.grade_point_accepted {
                accepted += 1;
            }
        }
        assert!(accepted > 250, "{}", accepted);

        let grade = session.grade().await;
        assert!(grade.gain_m > 15.0, "{:?}", grade);
        assert!(grade.smoothed_percent > 3.0 && grade.smoothed_percent < 15.0, "{:?}", grade);
        assert_eq!(grade.loss_m, 0.0);
    }

    #[tokio::test]
    async fn test_telemetry_reports_altitude_bookkeeping() {
        let session = TrackingSession::new(TrackerConfig::default()).unwrap();
        session.calibrate_altitude(500.0, 960.0).await;
        let summary = session.telemetry().await;
        assert_eq!(summary.reference_pressure_hpa, Some(960.0));
        assert_eq!(summary.altitude_measurements, 0);

        session
            .ingest_barometer(BarometerSample {
                timestamp: 1.0,
                relative_altitude: 0.2,
                pressure_hpa: 960.0,
            })
            .await;
        assert_eq!(session.telemetry().await.altitude_measurements, 1);
        assert!(session.health_status().contains("Barometer ok"));
    }

    #[tokio::test]
    async fn test_barometer_waits_for_anchor() {
        let session = TrackingSession::new(TrackerConfig::default()).unwrap();
        let sample = BarometerSample {
            timestamp: 0.0,
            relative_altitude: 1.5,
            pressure_hpa: 960.0,
        };
        assert!(session.ingest_barometer(sample).await.is_none());

        session.ingest_location(fix(1.0, 47.0, 501.5, 0.0)).await;
        let filtered = session
            .ingest_barometer(BarometerSample {
                timestamp: 2.0,
                ..sample
            })
            .await
            .unwrap();
        assert!((filtered - 501.5).abs() < 1.0);
    }

    #[tokio::test]
    async fn test_manual_override_published_on_stream() {
        let session = TrackingSession::new(TrackerConfig::default()).unwrap();
        let mut events = Box::pin(session.subscribe());

        session.set_manual_override(Some(TerrainType::Sand)).await;
        let update = session.run_detection_cycle().await.unwrap();
        assert_eq!(update.terrain, TerrainType::Sand);
        assert_eq!(update.confidence, 1.0);

        match events.next().await {
            Some(TerrainEvent::Factor(update)) => assert_eq!(update.terrain, TerrainType::Sand),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stop_ends_stream_and_rejects_restart() {
        let session = TrackingSession::new(TrackerConfig::default()).unwrap();
        let events = session.subscribe();
        session.start().unwrap();
        session.stop().await;
        assert!(session.is_stopped());
        let collected: Vec<TerrainEvent> = events.collect().await;
        assert!(collected.iter().all(|e| matches!(e, TerrainEvent::Factor(_))));
        assert!(matches!(session.start(), Err(TrackerError::SessionStopped)));
    }

    #[tokio::test]
    async fn test_feeds_released_on_stop() {
        let session = TrackingSession::new(TrackerConfig::default()).unwrap();
        let (tx, rx) = mpsc::channel(8);
        session.attach_inertial_feed(rx).unwrap();
        tx.send(SensorSample::new(0.0, (0.0, 0.0, 0.1), (0.0, 0.0, 0.0)))
            .await
            .unwrap();
        session.stop().await;
        assert!(tx.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_inertial_sensor_reports_degraded() {
        let session = TrackingSession::new(TrackerConfig::default()).unwrap();
        let mut events = Box::pin(session.subscribe());
        tokio::time::advance(Duration::from_secs(6)).await;

        session.run_detection_cycle().await;
        match events.next().await {
            Some(TerrainEvent::DetectionDegraded { reason, .. }) => assert!(reason.contains("inertial")),
            other => panic!("unexpected event {:?}", other),
        }
        // Detection still produced the default terrain
        let terrain = session.terrain().await.unwrap();
        assert_eq!(terrain.terrain, TerrainType::Pavement);
        assert_eq!(terrain.confidence, 0.3);
    }
}
