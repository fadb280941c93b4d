// ─────────────────────────────────────────────────────────────────────
// Mesh Tuner Kernel — Types
// (C) 1998-2026 Miroslav Sotek. All rights reserved.
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
#![deny(unsafe_code)]
//! Type definitions, configuration, and error hierarchy for the
//! Mesh Tuner — the closed-loop gear-mesh alignment optimizer.

pub mod config;
pub mod error;
pub mod features;
pub mod record;

pub use config::{
    CviWeights, Limits, LoopConfig, ProtocolConfig, SafetyThresholds, SelectionMode, Settings,
    SettingsUpdate, SpecRefs, StepConfig, TunerConfig,
};
pub use error::{TuneError, TuneResult};
pub use features::{Axis, AxisFeatures, FeatureVector};
pub use record::{
    CandidateRecord, ChosenPoint, HistoryEntry, Position, RunSummary, StepState, StopReason,
};
