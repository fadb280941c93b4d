// ─────────────────────────────────────────────────────────────────────
// Mesh Tuner Kernel — Synthetic Vibration Field
// ─────────────────────────────────────────────────────────────────────
//! Bowl-shaped stand-in for a gearbox on the test rig: every vibration
//! metric grows with the squared distance from a hidden optimum, with an
//! optional deterministic ripple to make the landscape less trivial.

use std::thread;
use std::time::Duration;

use meshtune_core::ExternalOracle;
use meshtune_types::{AxisFeatures, FeatureVector, Position};

#[derive(Debug, Clone, Copy)]
pub struct SyntheticField {
    pub optimum: Position,
    /// Time-domain RMS at the optimum.
    pub base_rms: f64,
    /// RMS growth per unit of squared distance.
    pub curvature: f64,
    /// Relative amplitude of the ripple term, 0 for a clean bowl.
    pub ripple: f64,
}

impl SyntheticField {
    pub fn new(optimum: Position) -> Self {
        Self {
            optimum,
            base_rms: 0.5,
            curvature: 0.05,
            ripple: 0.0,
        }
    }

    pub fn with_ripple(mut self, ripple: f64) -> Self {
        self.ripple = ripple;
        self
    }

    pub fn features(&self, p: Position) -> FeatureVector {
        let d2 = p.squared_distance(self.optimum);
        let wobble = 1.0 + self.ripple * (3.0 * p.x).sin() * (3.0 * p.y).cos();
        let x = AxisFeatures {
            time_rms: (self.base_rms + self.curvature * d2) * wobble,
            time_crest_factor: 3.0 + 0.1 * d2,
            time_skewness: 0.1 * d2.sqrt(),
            time_kurtosis: 3.0 + 0.2 * d2,
            spectrum_rms: 0.01 * (1.0 + d2) * wobble,
            spectrum_skewness: 3.0 + 0.5 * d2,
            spectrum_kurtosis: 150.0 + 20.0 * d2,
            spectrum_crest_factor: 4.0 + 0.1 * d2,
        };
        let y = AxisFeatures {
            time_rms: 0.8 * x.time_rms,
            spectrum_rms: 0.9 * x.spectrum_rms,
            ..x
        };
        FeatureVector {
            x,
            y: Some(y),
            z: None,
        }
    }

    /// Oracle view of the field; `delay` emulates the rig's settle time.
    pub fn oracle(self, delay: Duration) -> ExternalOracle {
        ExternalOracle::new(move |p| {
            if !delay.is_zero() {
                thread::sleep(delay);
            }
            Ok(self.features(p))
        })
    }
}
