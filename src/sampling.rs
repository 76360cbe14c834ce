//! Adaptive location sampling: picks the location provider's accuracy,
//! distance filter and interval from movement, power and session length.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};

use crate::config::SamplingControllerConfig;
use crate::types::{LocationFix, TerrainType};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccuracyTier {
    Best,
    NearestTenMeters,
    HundredMeters,
    Kilometer,
    ThreeKilometers,
}

impl AccuracyTier {
    /// Nominal location-stack drain at this accuracy [% battery per hour]
    fn base_drain(&self) -> f64 {
        match self {
            AccuracyTier::Best => 8.0,
            AccuracyTier::NearestTenMeters => 5.0,
            AccuracyTier::HundredMeters => 3.0,
            AccuracyTier::Kilometer => 1.5,
            AccuracyTier::ThreeKilometers => 1.0,
        }
    }
}

/// Presets ordered from most aggressive to most conservative, so `max`
/// picks the tighter power budget.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingPreset {
    HighPrecision,
    Balanced,
    Efficient,
    PowerSaver,
    UltraLow,
}

impl SamplingPreset {
    pub const MOST_CONSERVATIVE: SamplingPreset = SamplingPreset::UltraLow;

    pub fn configuration(self) -> SamplingConfiguration {
        let (accuracy, distance_filter_m, update_interval_secs) = match self {
            SamplingPreset::HighPrecision => (AccuracyTier::Best, 5.0, 1.0),
            SamplingPreset::Balanced => (AccuracyTier::NearestTenMeters, 10.0, 2.0),
            SamplingPreset::Efficient => (AccuracyTier::HundredMeters, 25.0, 5.0),
            SamplingPreset::PowerSaver => (AccuracyTier::Kilometer, 50.0, 10.0),
            SamplingPreset::UltraLow => (AccuracyTier::ThreeKilometers, 100.0, 30.0),
        };
        SamplingConfiguration {
            preset: self,
            accuracy,
            distance_filter_m,
            update_interval_secs,
        }
    }
}

/// What gets applied at the location-provider boundary
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SamplingConfiguration {
    pub preset: SamplingPreset,
    pub accuracy: AccuracyTier,
    pub distance_filter_m: f64,
    pub update_interval_secs: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementPattern {
    Stationary,
    Walking,
    Jogging,
    Running,
    Unknown,
}

impl MovementPattern {
    fn drain_multiplier(&self) -> f64 {
        match self {
            MovementPattern::Stationary => 0.6,
            MovementPattern::Walking | MovementPattern::Unknown => 1.0,
            MovementPattern::Jogging => 1.1,
            MovementPattern::Running => 1.2,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerTier {
    Normal,
    Low,
    Critical,
    UltraLow,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PowerState {
    /// Battery fraction in [0, 1]
    pub battery: f64,
    pub power_saving: bool,
}

impl Default for PowerState {
    fn default() -> Self {
        Self {
            battery: 1.0,
            power_saving: false,
        }
    }
}

impl PowerState {
    pub fn tier(&self, config: &SamplingControllerConfig) -> PowerTier {
        let by_level = if self.battery <= config.ultra_low_battery {
            PowerTier::UltraLow
        } else if self.battery <= config.critical_battery {
            PowerTier::Critical
        } else if self.battery <= config.low_battery {
            PowerTier::Low
        } else {
            PowerTier::Normal
        };
        if self.power_saving {
            by_level.max(PowerTier::Low)
        } else {
            by_level
        }
    }
}

/// Receives every applied configuration change. Called with the
/// controller locked, so implementations must not call back into it.
pub trait ConfigurationListener: Send + Sync {
    fn on_configuration_changed(&self, configuration: &SamplingConfiguration);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub struct SamplingController {
    config: SamplingControllerConfig,
    speeds: VecDeque<f64>,
    pattern: MovementPattern,
    power: PowerState,
    adaptive: bool,
    battery_optimization: bool,
    terrain: Option<(TerrainType, f64)>,
    session_start: Option<f64>,
    last_timestamp: Option<f64>,
    last_change: Option<f64>,
    current: SamplingConfiguration,
    changes: u64,
    listeners: Vec<(ListenerId, Weak<dyn ConfigurationListener>)>,
    next_listener: u64,
}

impl SamplingController {
    pub fn new(config: SamplingControllerConfig) -> Self {
        Self {
            speeds: VecDeque::with_capacity(config.speed_window),
            pattern: MovementPattern::Unknown,
            power: PowerState::default(),
            adaptive: true,
            battery_optimization: true,
            terrain: None,
            session_start: None,
            last_timestamp: None,
            last_change: None,
            current: SamplingPreset::Balanced.configuration(),
            changes: 0,
            listeners: Vec::new(),
            next_listener: 0,
            config,
        }
    }

    /// Feed a location fix. Returns the new configuration when one was
    /// applied.
    pub fn ingest(&mut self, fix: &LocationFix) -> Option<SamplingConfiguration> {
        if !fix.timestamp.is_finite() || self.last_timestamp.map_or(false, |t| fix.timestamp < t) {
            return None;
        }
        self.session_start.get_or_insert(fix.timestamp);
        self.last_timestamp = Some(fix.timestamp);

        if fix.has_valid_speed() {
            if self.speeds.len() == self.config.speed_window {
                self.speeds.pop_front();
            }
            self.speeds.push_back(fix.speed);
            self.pattern = self.classify_pattern();
        }

        self.evaluate(true)
    }

    pub fn average_speed(&self) -> Option<f64> {
        if self.speeds.is_empty() {
            None
        } else {
            Some(self.speeds.iter().sum::<f64>() / self.speeds.len() as f64)
        }
    }

    fn classify_pattern(&self) -> MovementPattern {
        match self.average_speed() {
            None => MovementPattern::Unknown,
            Some(v) if v < self.config.stationary_max_speed => MovementPattern::Stationary,
            Some(v) if v < self.config.walking_max_speed => MovementPattern::Walking,
            Some(v) if v < self.config.jogging_max_speed => MovementPattern::Jogging,
            Some(_) => MovementPattern::Running,
        }
    }

    /// Unconstrained preset for a movement pattern
    pub fn baseline_preset(&self, pattern: MovementPattern) -> SamplingPreset {
        match pattern {
            MovementPattern::Stationary => SamplingPreset::UltraLow,
            MovementPattern::Walking => match self.terrain {
                Some((terrain, confidence))
                    if terrain != TerrainType::Pavement
                        && confidence >= self.config.terrain_precision_confidence =>
                {
                    SamplingPreset::HighPrecision
                }
                _ => SamplingPreset::Balanced,
            },
            MovementPattern::Jogging | MovementPattern::Unknown => SamplingPreset::Balanced,
            MovementPattern::Running => SamplingPreset::HighPrecision,
        }
    }

    /// Least conservative preset the power state allows
    fn power_cap(&self) -> SamplingPreset {
        match self.power.tier(&self.config) {
            PowerTier::Normal => SamplingPreset::HighPrecision,
            PowerTier::Low if self.battery_optimization => SamplingPreset::Efficient,
            PowerTier::Low => SamplingPreset::HighPrecision,
            PowerTier::Critical => SamplingPreset::PowerSaver,
            PowerTier::UltraLow => SamplingPreset::UltraLow,
        }
    }

    /// Battery limits that hold even when the preset is pinned
    fn hard_power_cap(&self) -> SamplingPreset {
        match self.power.tier(&self.config) {
            PowerTier::Critical => SamplingPreset::PowerSaver,
            PowerTier::UltraLow => SamplingPreset::UltraLow,
            PowerTier::Normal | PowerTier::Low => SamplingPreset::HighPrecision,
        }
    }

    fn target_preset(&self) -> SamplingPreset {
        let elapsed = match (self.session_start, self.last_timestamp) {
            (Some(start), Some(now)) => now - start,
            _ => 0.0,
        };
        if elapsed > self.config.long_session_secs {
            return SamplingPreset::MOST_CONSERVATIVE;
        }
        if !self.adaptive {
            return self.config.fixed_preset.max(self.hard_power_cap());
        }
        self.baseline_preset(self.pattern).max(self.power_cap())
    }

    fn evaluate(&mut self, rate_limited: bool) -> Option<SamplingConfiguration> {
        let target = self.target_preset();
        if target == self.current.preset {
            return None;
        }

        let now = self.last_timestamp.unwrap_or(0.0);
        if rate_limited {
            if let Some(last) = self.last_change {
                if now - last < self.config.min_reconfigure_interval_secs {
                    log::debug!(
                        "sampling: {:?} pending, last change {:.1}s ago",
                        target,
                        now - last
                    );
                    return None;
                }
            }
        }

        self.apply(target, now);
        Some(self.current)
    }

    fn apply(&mut self, preset: SamplingPreset, now: f64) {
        log::info!(
            "sampling: {:?} -> {:?} (pattern {:?}, battery {:.0}%)",
            self.current.preset,
            preset,
            self.pattern,
            self.power.battery * 100.0
        );
        self.current = preset.configuration();
        self.last_change = Some(now);
        self.changes += 1;

        let configuration = self.current;
        self.listeners.retain(|(_, weak)| match weak.upgrade() {
            Some(listener) => {
                listener.on_configuration_changed(&configuration);
                true
            }
            None => false,
        });
    }

    /// Re-evaluate immediately, ignoring the rate limit
    pub fn force_reconfigure(&mut self) -> Option<SamplingConfiguration> {
        self.evaluate(false)
    }

    pub fn set_adaptive_mode(&mut self, enabled: bool) -> Option<SamplingConfiguration> {
        self.adaptive = enabled;
        self.evaluate(false)
    }

    /// When off, a merely low battery no longer throttles sampling. Critical
    /// levels still do.
    pub fn set_battery_optimization(&mut self, enabled: bool) -> Option<SamplingConfiguration> {
        self.battery_optimization = enabled;
        self.evaluate(false)
    }

    /// Tightening takes effect at once; loosening waits out the rate limit
    /// like any other change.
    pub fn update_power(&mut self, battery: f64, power_saving: bool) -> Option<SamplingConfiguration> {
        let battery = if battery.is_finite() { battery.clamp(0.0, 1.0) } else { self.power.battery };
        self.power = PowerState { battery, power_saving };
        let tightening = self.target_preset() > self.current.preset;
        self.evaluate(!tightening)
    }

    /// Latest arbiter decision; off-pavement walking gets finer sampling
    pub fn note_terrain(&mut self, terrain: TerrainType, confidence: f64) -> Option<SamplingConfiguration> {
        self.terrain = Some((terrain, confidence));
        self.evaluate(true)
    }

    pub fn recommended_configuration(&self) -> SamplingConfiguration {
        self.current
    }

    pub fn movement_pattern(&self) -> MovementPattern {
        self.pattern
    }

    pub fn power_state(&self) -> PowerState {
        self.power
    }

    pub fn change_count(&self) -> u64 {
        self.changes
    }

    /// Estimated battery drain of the current configuration [% per hour].
    /// Computed from nominal rates, not measured.
    pub fn estimated_battery_drain(&self) -> f64 {
        let cfg = &self.current;
        let frequency = 0.5 + 0.5 / cfg.update_interval_secs.max(1.0);
        let distance_bonus = if cfg.distance_filter_m >= 50.0 {
            0.7
        } else if cfg.distance_filter_m >= 20.0 {
            0.85
        } else {
            1.0
        };
        cfg.accuracy.base_drain() * frequency * distance_bonus * self.pattern.drain_multiplier()
    }

    /// Keep a non-owning reference; the listener goes away when its last
    /// `Arc` is dropped.
    pub fn register_listener(&mut self, listener: &Arc<dyn ConfigurationListener>) -> ListenerId {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        self.listeners.push((id, Arc::downgrade(listener)));
        id
    }

    pub fn deregister_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        self.listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.iter().filter(|(_, w)| w.strong_count() > 0).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn controller() -> SamplingController {
        SamplingController::new(SamplingControllerConfig::default())
    }

    fn fix(timestamp: f64, speed: f64) -> LocationFix {
        LocationFix {
            timestamp,
            latitude: 47.0,
            longitude: 8.0,
            altitude: 400.0,
            horizontal_accuracy: 5.0,
            vertical_accuracy: 8.0,
            speed,
            course: 0.0,
        }
    }

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<SamplingPreset>>,
    }

    impl ConfigurationListener for Recorder {
        fn on_configuration_changed(&self, configuration: &SamplingConfiguration) {
            self.seen.lock().unwrap().push(configuration.preset);
        }
    }

    #[test]
    fn test_stationary_goes_most_conservative() {
        let mut c = controller();
        let applied = c.ingest(&fix(0.0, 0.0)).unwrap();
        assert_eq!(applied.preset, SamplingPreset::UltraLow);
        assert_eq!(c.movement_pattern(), MovementPattern::Stationary);
    }

    #[test]
    fn test_speed_bands() {
        for (speed, pattern) in [
            (0.1, MovementPattern::Stationary),
            (1.4, MovementPattern::Walking),
            (2.8, MovementPattern::Jogging),
            (4.5, MovementPattern::Running),
        ] {
            let mut c = controller();
            c.ingest(&fix(0.0, speed));
            assert_eq!(c.movement_pattern(), pattern);
        }
        let mut c = controller();
        c.ingest(&fix(0.0, -1.0));
        assert_eq!(c.movement_pattern(), MovementPattern::Unknown);
    }

    #[test]
    fn test_rate_limit_one_change_per_window() {
        let mut c = controller();
        let mut changes = Vec::new();
        for i in 0..60 {
            let t = i as f64;
            let speed = i as f64 * 0.1;
            if c.ingest(&fix(t, speed)).is_some() {
                changes.push(t);
            }
        }
        assert!(changes.len() >= 2);
        for pair in changes.windows(2) {
            assert!(pair[1] - pair[0] >= 5.0, "{:?}", changes);
        }
    }

    #[test]
    fn test_power_never_loosens_baseline() {
        let patterns = [
            MovementPattern::Stationary,
            MovementPattern::Walking,
            MovementPattern::Jogging,
            MovementPattern::Running,
            MovementPattern::Unknown,
        ];
        for battery in [1.0, 0.5, 0.2, 0.15, 0.08, 0.02] {
            for power_saving in [false, true] {
                for optimize in [false, true] {
                    let mut c = controller();
                    c.set_battery_optimization(optimize);
                    c.update_power(battery, power_saving);
                    for pattern in patterns {
                        c.pattern = pattern;
                        let target = c.target_preset();
                        assert!(target >= c.baseline_preset(pattern));
                    }
                }
            }
        }
    }

    #[test]
    fn test_low_battery_caps_running() {
        let mut c = controller();
        c.ingest(&fix(0.0, 5.0));
        assert_eq!(c.recommended_configuration().preset, SamplingPreset::HighPrecision);
        c.update_power(0.15, false);
        assert_eq!(c.recommended_configuration().preset, SamplingPreset::Efficient);
        c.update_power(0.08, false);
        assert_eq!(c.recommended_configuration().preset, SamplingPreset::PowerSaver);

        c.update_power(0.15, false);
        c.set_battery_optimization(false);
        assert_eq!(c.recommended_configuration().preset, SamplingPreset::HighPrecision);
        c.update_power(0.03, false);
        assert_eq!(c.recommended_configuration().preset, SamplingPreset::UltraLow);
    }

    #[test]
    fn test_long_session_forces_ultra_low() {
        let mut c = controller();
        c.ingest(&fix(0.0, 5.0));
        c.ingest(&fix(7201.0, 5.0));
        assert_eq!(c.recommended_configuration().preset, SamplingPreset::UltraLow);
    }

    #[test]
    fn test_power_toggling_respects_rate_limit() {
        let mut c = controller();
        c.ingest(&fix(0.0, 1.4));
        c.ingest(&fix(6.0, 1.4));
        let before = c.change_count();

        let applied = (0..10)
            .filter(|i| c.update_power(1.0, i % 2 == 0).is_some())
            .count();
        // Only the first switch into power saving gets through
        assert_eq!(applied, 1);
        assert_eq!(c.change_count(), before + 1);
        assert_eq!(c.recommended_configuration().preset, SamplingPreset::Efficient);

        // Loosening lands on the first fix after the window
        c.update_power(1.0, false);
        assert!(c.ingest(&fix(8.0, 1.4)).is_none());
        let loosened = c.ingest(&fix(11.0, 1.4)).unwrap();
        assert_eq!(loosened.preset, SamplingPreset::Balanced);
    }

    #[test]
    fn test_fixed_mode_keeps_hard_caps() {
        let mut c = controller();
        c.set_adaptive_mode(false);
        c.ingest(&fix(0.0, 5.0));
        c.update_power(0.15, false);
        assert_eq!(c.recommended_configuration().preset, SamplingPreset::Balanced);
        c.update_power(0.08, false);
        assert_eq!(c.recommended_configuration().preset, SamplingPreset::PowerSaver);

        let mut long = controller();
        long.set_adaptive_mode(false);
        long.ingest(&fix(0.0, 5.0));
        long.ingest(&fix(7201.0, 5.0));
        assert_eq!(long.recommended_configuration().preset, SamplingPreset::UltraLow);
    }

    #[test]
    fn test_fixed_mode_ignores_movement() {
        let mut c = controller();
        c.set_adaptive_mode(false);
        c.ingest(&fix(0.0, 0.0));
        assert_eq!(c.recommended_configuration().preset, SamplingPreset::Balanced);
        c.set_adaptive_mode(true);
        assert_eq!(c.recommended_configuration().preset, SamplingPreset::UltraLow);
    }

    #[test]
    fn test_off_pavement_walking_raises_precision() {
        let mut c = controller();
        c.ingest(&fix(0.0, 1.4));
        assert_eq!(c.recommended_configuration().preset, SamplingPreset::Balanced);
        c.ingest(&fix(6.0, 1.4));
        c.note_terrain(TerrainType::Trail, 0.8);
        assert_eq!(c.recommended_configuration().preset, SamplingPreset::HighPrecision);
    }

    #[test]
    fn test_battery_estimate_ordering() {
        let mut c = controller();
        c.ingest(&fix(0.0, 5.0));
        let running = c.estimated_battery_drain();
        let mut s = controller();
        s.ingest(&fix(0.0, 0.0));
        let stationary = s.estimated_battery_drain();
        assert!(running > stationary);
        // Best accuracy, 1 s interval, 5 m filter, running
        assert!((running - 8.0 * 1.0 * 1.0 * 1.2).abs() < 1e-12);
    }

    #[test]
    fn test_listeners_are_weak() {
        let mut c = controller();
        let recorder = Arc::new(Recorder::default());
        let as_listener: Arc<dyn ConfigurationListener> = recorder.clone();
        let id = c.register_listener(&as_listener);
        drop(as_listener);
        assert_eq!(c.listener_count(), 1);

        c.ingest(&fix(0.0, 0.0));
        assert_eq!(*recorder.seen.lock().unwrap(), vec![SamplingPreset::UltraLow]);

        assert!(c.deregister_listener(id));
        c.update_power(1.0, false);
        c.ingest(&fix(10.0, 5.0));
        assert_eq!(recorder.seen.lock().unwrap().len(), 1);

        let dropped: Arc<dyn ConfigurationListener> = Arc::new(Recorder::default());
        c.register_listener(&dropped);
        drop(dropped);
        assert_eq!(c.listener_count(), 0);
    }

    #[test]
    fn test_configuration_roundtrip() {
        let original = SamplingPreset::PowerSaver.configuration();
        let json = serde_json::to_string(&original).unwrap();
        let restored: SamplingConfiguration = serde_json::from_str(&json).unwrap();
        assert_eq!(original, restored);
    }
}
