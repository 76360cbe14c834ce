use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::config::ArbiterConfig;
use crate::types::{clamp_unit, ContextHint, DetectionMethod, TerrainClassification, TerrainType};

/// Gated output for the calorie engine
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TerrainFactorUpdate {
    pub terrain_factor: f64,
    pub confidence: f64,
    pub terrain: TerrainType,
    pub timestamp: f64,
}

/// Energy multiplier scaled by how sure we are: an unsure "sand" only
/// nudges the factor away from 1.0.
pub fn terrain_factor(terrain: TerrainType, confidence: f64) -> f64 {
    1.0 + (terrain.base_factor() - 1.0) * clamp_unit(confidence)
}

/// Combines the motion classifier, an optional context hint and an optional
/// manual override into one classification per cycle.
pub struct TerrainArbiter {
    config: ArbiterConfig,
    manual_override: Option<TerrainType>,
    context_hint: Option<ContextHint>,
    history: VecDeque<TerrainClassification>,
    last_emitted: Option<TerrainFactorUpdate>,
}

impl TerrainArbiter {
    pub fn new(config: ArbiterConfig) -> Self {
        Self {
            history: VecDeque::with_capacity(config.history_capacity),
            manual_override: None,
            context_hint: None,
            last_emitted: None,
            config,
        }
    }

    pub fn set_manual_override(&mut self, terrain: Option<TerrainType>) {
        match (self.manual_override, terrain) {
            (_, Some(t)) => log::info!("terrain override set: {}", t.name()),
            (Some(_), None) => log::info!("terrain override cleared, resuming automatic detection"),
            (None, None) => {}
        }
        self.manual_override = terrain;
    }

    pub fn manual_override(&self) -> Option<TerrainType> {
        self.manual_override
    }

    pub fn set_context_hint(&mut self, hint: Option<ContextHint>) {
        self.context_hint = hint;
    }

    /// Decide the current terrain from the classifier's latest output and
    /// record it in history.
    pub fn fuse(&mut self, motion: Option<&TerrainClassification>, timestamp: f64) -> TerrainClassification {
        let decision = self.decide(motion, timestamp);
        if self.history.len() == self.config.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(decision);
        decision
    }

    fn decide(&self, motion: Option<&TerrainClassification>, timestamp: f64) -> TerrainClassification {
        if let Some(terrain) = self.manual_override {
            return TerrainClassification::manual(terrain, timestamp);
        }

        let cfg = &self.config;
        let motion = motion.map(|m| (m.terrain, clamp_unit(m.confidence)));
        let hint = self
            .context_hint
            .map(|h| (h.terrain, clamp_unit(h.confidence) * cfg.hint_trust));

        let result = |terrain, confidence, method| TerrainClassification::new(terrain, confidence, timestamp, method);

        match (motion, hint) {
            (Some((mt, mc)), Some((ht, hc))) if mc >= cfg.medium_confidence && hc >= cfg.medium_confidence => {
                let both_high = mc >= cfg.high_confidence && hc >= cfg.high_confidence;
                if mt == ht {
                    let confidence = if both_high {
                        (mc.max(hc) + cfg.agreement_boost).min(1.0)
                    } else {
                        mc.max(hc)
                    };
                    result(mt, confidence, DetectionMethod::Fused)
                } else {
                    let penalized = |c: f64| c * (1.0 - cfg.disagreement_penalty);
                    if mc >= hc {
                        result(mt, penalized(mc), DetectionMethod::MotionSignature)
                    } else {
                        result(ht, penalized(hc), DetectionMethod::ContextHint)
                    }
                }
            }
            (Some((mt, mc)), _) if mc >= cfg.medium_confidence => result(mt, mc, DetectionMethod::MotionSignature),
            (_, Some((ht, hc))) if hc >= cfg.medium_confidence => result(ht, hc, DetectionMethod::ContextHint),
            _ => result(cfg.default_terrain, cfg.default_confidence, DetectionMethod::Default),
        }
    }

    /// Change gate on the factor stream: the first decision, a factor move
    /// beyond the threshold, or confidence rising through the high bar.
    pub fn gate(&mut self, decision: &TerrainClassification) -> Option<TerrainFactorUpdate> {
        let update = TerrainFactorUpdate {
            terrain_factor: terrain_factor(decision.terrain, decision.confidence),
            confidence: decision.confidence,
            terrain: decision.terrain,
            timestamp: decision.timestamp,
        };

        let emit = match &self.last_emitted {
            None => true,
            Some(last) => {
                let moved = (update.terrain_factor - last.terrain_factor).abs() > self.config.factor_change_threshold;
                let crossed = last.confidence < self.config.confidence_emit_threshold
                    && update.confidence >= self.config.confidence_emit_threshold;
                moved || crossed
            }
        };

        if emit {
            self.last_emitted = Some(update);
            Some(update)
        } else {
            None
        }
    }

    pub fn current(&self) -> Option<&TerrainClassification> {
        self.history.back()
    }

    pub fn history(&self) -> impl Iterator<Item = &TerrainClassification> {
        self.history.iter()
    }

    pub fn last_emitted(&self) -> Option<TerrainFactorUpdate> {
        self.last_emitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn arbiter() -> TerrainArbiter {
        TerrainArbiter::new(ArbiterConfig::default())
    }

    fn motion(terrain: TerrainType, confidence: f64) -> TerrainClassification {
        TerrainClassification::new(terrain, confidence, 0.0, DetectionMethod::MotionSignature)
    }

    fn hint(terrain: TerrainType, confidence: f64) -> Option<ContextHint> {
        Some(ContextHint { terrain, confidence })
    }

    #[test]
    fn test_manual_override_always_wins() {
        let mut a = arbiter();
        a.set_context_hint(hint(TerrainType::Trail, 1.0));
        a.set_manual_override(Some(TerrainType::Sand));
        for c in [0.0, 0.5, 0.99] {
            let d = a.fuse(Some(&motion(TerrainType::Gravel, c)), 1.0);
            assert_eq!(d.terrain, TerrainType::Sand);
            assert_eq!(d.confidence, 1.0);
            assert!(d.manual_override);
        }

        a.set_manual_override(None);
        let d = a.fuse(Some(&motion(TerrainType::Gravel, 0.9)), 2.0);
        assert_eq!(d.terrain, TerrainType::Gravel);
        assert!(!d.manual_override);
    }

    #[test]
    fn test_high_agreement_boosts() {
        let mut a = arbiter();
        a.set_context_hint(hint(TerrainType::Trail, 0.95));
        let d = a.fuse(Some(&motion(TerrainType::Trail, 0.8)), 0.0);
        assert_eq!(d.method, DetectionMethod::Fused);
        assert_abs_diff_eq!(d.confidence, 0.95 * 0.85 + 0.1, epsilon = 1e-12);

        a.set_context_hint(hint(TerrainType::Trail, 1.0));
        let d = a.fuse(Some(&motion(TerrainType::Trail, 0.98)), 0.0);
        assert_eq!(d.confidence, 1.0);
    }

    #[test]
    fn test_high_disagreement_penalizes() {
        let mut a = arbiter();
        a.set_context_hint(hint(TerrainType::Grass, 1.0));
        let d = a.fuse(Some(&motion(TerrainType::Trail, 0.8)), 0.0);
        // hint 1.0 * 0.85 trust beats motion 0.8
        assert_eq!(d.terrain, TerrainType::Grass);
        assert_abs_diff_eq!(d.confidence, 0.85 * 0.85, epsilon = 1e-12);
    }

    #[test]
    fn test_single_medium_source_used_alone() {
        let mut a = arbiter();
        a.set_context_hint(hint(TerrainType::Grass, 0.3));
        let d = a.fuse(Some(&motion(TerrainType::Gravel, 0.6)), 0.0);
        assert_eq!(d.terrain, TerrainType::Gravel);
        assert_eq!(d.confidence, 0.6);

        let d = a.fuse(Some(&motion(TerrainType::Gravel, 0.2)), 0.0);
        assert_eq!(d.method, DetectionMethod::Default);

        a.set_context_hint(hint(TerrainType::Grass, 0.9));
        let d = a.fuse(None, 0.0);
        assert_eq!(d.terrain, TerrainType::Grass);
        assert_eq!(d.method, DetectionMethod::ContextHint);
    }

    #[test]
    fn test_default_when_nothing_confident() {
        let mut a = arbiter();
        let d = a.fuse(Some(&motion(TerrainType::Mud, 0.4)), 3.0);
        assert_eq!(d.terrain, TerrainType::Pavement);
        assert_eq!(d.confidence, 0.3);
        assert_eq!(d.timestamp, 3.0);
    }

    #[test]
    fn test_history_bounded() {
        let mut a = TerrainArbiter::new(ArbiterConfig {
            history_capacity: 5,
            ..ArbiterConfig::default()
        });
        for i in 0..12 {
            a.fuse(None, i as f64);
        }
        assert_eq!(a.history().count(), 5);
        assert_eq!(a.history().next().unwrap().timestamp, 7.0);
        assert_eq!(a.current().unwrap().timestamp, 11.0);
    }

    #[test]
    fn test_gate_suppresses_small_changes() {
        let mut a = arbiter();
        let first = a.fuse(Some(&motion(TerrainType::Trail, 0.6)), 0.0);
        assert!(a.gate(&first).is_some());

        // factor 1.12 -> 1.124: below threshold
        let d = a.fuse(Some(&motion(TerrainType::Trail, 0.62)), 1.0);
        assert!(a.gate(&d).is_none());

        // crossing the high-confidence bar emits even for a small move
        let mut b = TerrainArbiter::new(ArbiterConfig {
            factor_change_threshold: 0.5,
            ..ArbiterConfig::default()
        });
        let d = b.fuse(Some(&motion(TerrainType::Trail, 0.75)), 0.0);
        assert!(b.gate(&d).is_some());
        let d = b.fuse(Some(&motion(TerrainType::Trail, 0.85)), 1.0);
        let update = b.gate(&d).unwrap();
        assert_eq!(update.terrain, TerrainType::Trail);
        assert_abs_diff_eq!(update.terrain_factor, 1.0 + 0.2 * 0.85, epsilon = 1e-12);
    }

    #[test]
    fn test_terrain_factor_scales_with_confidence() {
        assert_eq!(terrain_factor(TerrainType::Sand, 0.0), 1.0);
        assert_abs_diff_eq!(terrain_factor(TerrainType::Sand, 1.0), 1.6, epsilon = 1e-12);
        assert_eq!(terrain_factor(TerrainType::Pavement, 0.9), 1.0);
    }
}
