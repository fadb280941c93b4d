// ─────────────────────────────────────────────────────────────────────
// Mesh Tuner Kernel — Measurement Oracle Interface
// ─────────────────────────────────────────────────────────────────────
//! The seam between the optimizer and whatever produces measurements.
//!
//! In production the oracle is the point-query protocol client, which
//! moves the rig over the message bus and waits for the feature reply.
//! Offline deployments and tests plug in a closure via [`ExternalOracle`].

use meshtune_types::{FeatureVector, Position, TuneResult};

/// Anything that can move to a position and report its vibration features.
pub trait MeasurementOracle: Send + Sync {
    fn measure(&self, at: Position) -> TuneResult<FeatureVector>;
}

type MeasureFn = Box<dyn Fn(Position) -> TuneResult<FeatureVector> + Send + Sync>;

/// Oracle backed by a caller-supplied measurement function.
pub struct ExternalOracle {
    measure_fn: MeasureFn,
}

impl ExternalOracle {
    pub fn new(
        measure_fn: impl Fn(Position) -> TuneResult<FeatureVector> + Send + Sync + 'static,
    ) -> Self {
        Self {
            measure_fn: Box::new(measure_fn),
        }
    }
}

impl MeasurementOracle for ExternalOracle {
    fn measure(&self, at: Position) -> TuneResult<FeatureVector> {
        (self.measure_fn)(at)
    }
}
