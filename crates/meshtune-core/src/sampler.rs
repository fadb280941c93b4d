// ─────────────────────────────────────────────────────────────────────
// Mesh Tuner Kernel — Triangle Sampler
// ─────────────────────────────────────────────────────────────────────
//! Equilateral candidate pattern around the current position.
//!
//! Directions 0°, 120°, 240°, scaled per axis by the trust-region radius:
//! `(+sx, 0)`, `(-0.5·sx, +0.866·sy)`, `(-0.5·sx, -0.866·sy)`.

use meshtune_types::{Limits, Position, StepState};

const SIN_120: f64 = 0.866;

/// Raw offsets of the three candidates for the given radii.
pub fn triangle_offsets(step: StepState) -> [(f64, f64); 3] {
    [
        (step.sig_x, 0.0),
        (-0.5 * step.sig_x, SIN_120 * step.sig_y),
        (-0.5 * step.sig_x, -SIN_120 * step.sig_y),
    ]
}

/// Three candidate positions, each clamped independently into `limits`.
pub fn sample_candidates(center: Position, step: StepState, limits: &Limits) -> [Position; 3] {
    triangle_offsets(step).map(|(dx, dy)| limits.clamp(center.offset(dx, dy)))
}
