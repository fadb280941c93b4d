// ─────────────────────────────────────────────────────────────────────
// Mesh Tuner Kernel — Optimizer Core
// (C) 1998-2026 Miroslav Sotek. All rights reserved.
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
#![deny(unsafe_code)]
//! Closed-loop search engine for gear-mesh alignment: candidate
//! sampling, safety gating, reward and rank scoring, trust-region
//! adaptation, and the iteration loop that ties them together.
//!
//! # Search Invariants
//!
//! 1. **Position never leaves the limits**: the start, every candidate
//!    and every blended update are clamped into `Limits`.
//!
//! 2. **Sigmas never leave their bounds**: every grow or shrink clamps
//!    into `[sig_min, sig_max]` per axis.
//!
//! 3. **Unsafe candidates are never selected**: an unsafe measurement
//!    scores `-inf`, is excluded in both selection modes, and shrinks the
//!    trust region. A round with three unsafe candidates holds position.
//!
//! 4. **Improvement is always continuous**: rank mode only picks the
//!    winner; whether the round improved is decided on the continuous
//!    reward against `best_reward + epsilon`.
//!
//! 5. **Measurement is strictly sequential**: candidates and repeats are
//!    measured one at a time, in order.

pub mod optimizer;
pub mod oracle;
pub mod rank;
pub mod reward;
pub mod safety;
pub mod sampler;
pub mod step;

pub use optimizer::{CancelFlag, IterationStatus, OptimizerLoop};
pub use oracle::{ExternalOracle, MeasurementOracle};
pub use rank::RankEngine;
pub use reward::{CviComponents, RewardEngine};
pub use safety::SafetyGate;
pub use sampler::sample_candidates;
pub use step::{StepController, StepDecision};
