// ─────────────────────────────────────────────────────────────────────
// Mesh Tuner Kernel — Safety Gate
// ─────────────────────────────────────────────────────────────────────
//! Hard threshold check that excludes a candidate from selection
//! regardless of its reward.
//!
//! A measurement is unsafe when the max over populated axes of the
//! time-domain RMS exceeds `time_rms_max`, or the max of the time-domain
//! crest factor exceeds `time_cf_max`. A non-finite value on either metric
//! cannot be cleared and is treated as unsafe.

use meshtune_types::{FeatureVector, SafetyThresholds, TunerConfig};

/// Stateless safety classifier.
#[derive(Debug, Clone, Copy)]
pub struct SafetyGate {
    thresholds: SafetyThresholds,
}

impl SafetyGate {
    pub fn new(thresholds: SafetyThresholds) -> Self {
        Self { thresholds }
    }

    pub fn from_config(config: &TunerConfig) -> Self {
        Self::new(config.safety)
    }

    pub fn thresholds(&self) -> &SafetyThresholds {
        &self.thresholds
    }

    /// True iff the measurement must not be moved to.
    pub fn is_unsafe(&self, features: &FeatureVector) -> bool {
        let rms = features.max_over_axes(|a| a.time_rms);
        let cf = features.max_over_axes(|a| a.time_crest_factor);
        if !rms.is_finite() || !cf.is_finite() {
            log::warn!("safety gate: non-finite time metric (rms={rms}, cf={cf}), classifying unsafe");
            return true;
        }
        rms > self.thresholds.time_rms_max || cf > self.thresholds.time_cf_max
    }
}
