// ─────────────────────────────────────────────────────────────────────
// Mesh Tuner Kernel — Bus Link
// (C) 1998-2026 Miroslav Sotek. All rights reserved.
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
#![deny(unsafe_code)]
//! Networked deployment of the optimizer: the point-query protocol
//! client that turns a pub/sub bus into a `MeasurementOracle`, the
//! control session that owns the run lifecycle, and an in-process bus
//! with a rig simulator for the measurement side.
//!
//! # Delivery Guarantees
//!
//! The transport is at-least-once and unordered. Correlation entries are
//! single-assignment, so a duplicated or late result is dropped with a
//! warning and never reaches a different request. A request that stays
//! unanswered fails after `timeout × (retries + 1)`.

pub mod bus;
pub mod client;
pub mod messages;
pub mod rig;
pub mod session;
pub mod topics;

pub use bus::{Envelope, LocalBus, MessageBus};
pub use client::{PendingRegistry, PointProtocolClient};
pub use messages::{
    CandidateReport, CommandMessage, ControlMessage, EndKind, EndMessage, IterationReport,
    OptimizationResult, ResultMessage, RunReport, StatusMessage,
};
pub use rig::RigSimulator;
pub use session::{
    decode_envelope, spawn_bridge, ControlSession, LocalSession, RunOutcome, SessionEvent,
    SessionState,
};
pub use topics::Topics;
