// ─────────────────────────────────────────────────────────────────────
// Mesh Tuner Kernel — Wire Messages
// ─────────────────────────────────────────────────────────────────────
//! JSON payloads exchanged over the bus.
//!
//! Records are `type`-tagged, unknown fields are ignored on decode, and
//! every outbound record carries `ts` (RFC 3339, UTC) and `sender`.
//! Non-finite feature values travel as `null`.

use std::collections::BTreeMap;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use meshtune_types::{
    CandidateRecord, FeatureVector, HistoryEntry, Position, RunSummary, StepState, StopReason,
    TuneError, TuneResult,
};

use crate::session::SessionState;

/// Current UTC time in the wire format.
pub fn now_ts() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Finite values pass through; anything else is reported as absent.
pub fn finite(v: f64) -> Option<f64> {
    v.is_finite().then_some(v)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointXY {
    pub x: f64,
    pub y: f64,
}

impl From<Position> for PointXY {
    fn from(p: Position) -> Self {
        Self { x: p.x, y: p.y }
    }
}

impl From<PointXY> for Position {
    fn from(p: PointXY) -> Self {
        Position::new(p.x, p.y)
    }
}

/// Tuner → rig.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandMessage {
    MovePoint {
        req_id: String,
        point: PointXY,
        #[serde(default)]
        ts: String,
        #[serde(default)]
        sender: String,
    },
}

impl CommandMessage {
    pub fn move_point(req_id: &str, at: Position, sender: &str) -> Self {
        CommandMessage::MovePoint {
            req_id: req_id.to_string(),
            point: at.into(),
            ts: now_ts(),
            sender: sender.to_string(),
        }
    }
}

/// Rig → tuner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResultMessage {
    ResultFeatureSet {
        req_id: String,
        features: Vec<String>,
        values: Vec<Option<f64>>,
        #[serde(default)]
        ts: String,
        #[serde(default)]
        sender: String,
    },
    Error {
        req_id: String,
        error_message: String,
        #[serde(default)]
        ts: String,
        #[serde(default)]
        sender: String,
    },
}

impl ResultMessage {
    pub fn feature_set(req_id: &str, features: &FeatureVector, sender: &str) -> Self {
        let (names, values) = features.to_named();
        ResultMessage::ResultFeatureSet {
            req_id: req_id.to_string(),
            features: names,
            values: values.into_iter().map(finite).collect(),
            ts: now_ts(),
            sender: sender.to_string(),
        }
    }

    pub fn error(req_id: &str, message: impl Into<String>, sender: &str) -> Self {
        ResultMessage::Error {
            req_id: req_id.to_string(),
            error_message: message.into(),
            ts: now_ts(),
            sender: sender.to_string(),
        }
    }

    pub fn req_id(&self) -> &str {
        match self {
            ResultMessage::ResultFeatureSet { req_id, .. } | ResultMessage::Error { req_id, .. } => {
                req_id
            }
        }
    }

    /// Validate into a feature vector; `null` values become NaN.
    pub fn into_features(self) -> TuneResult<FeatureVector> {
        match self {
            ResultMessage::ResultFeatureSet {
                features, values, ..
            } => {
                let values: Vec<f64> = values.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect();
                FeatureVector::from_named(&features, &values)
            }
            ResultMessage::Error {
                req_id,
                error_message,
                ..
            } => Err(TuneError::RemoteMeasurement {
                req_id,
                message: error_message,
            }),
        }
    }
}

/// Operator → tuner run control.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    Start {
        #[serde(default)]
        ts: String,
        #[serde(default)]
        sender: String,
    },
    Stop {
        #[serde(default)]
        ts: String,
        #[serde(default)]
        sender: String,
    },
}

impl ControlMessage {
    pub fn start(sender: &str) -> Self {
        ControlMessage::Start {
            ts: now_ts(),
            sender: sender.to_string(),
        }
    }

    pub fn stop(sender: &str) -> Self {
        ControlMessage::Stop {
            ts: now_ts(),
            sender: sender.to_string(),
        }
    }
}

/// Retained status record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusMessage {
    pub online: bool,
    pub state: SessionState,
    pub ts: String,
    #[serde(default)]
    pub sender: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndKind {
    End,
    Stopped,
}

/// One measured candidate as reported on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CandidateReport {
    pub x: f64,
    pub y: f64,
    #[serde(rename = "unsafe")]
    pub unsafe_: bool,
    pub reward: Option<f64>,
    #[serde(default)]
    pub rank_score: Option<f64>,
}

impl From<&CandidateRecord> for CandidateReport {
    fn from(c: &CandidateRecord) -> Self {
        Self {
            x: c.x,
            y: c.y,
            unsafe_: c.unsafe_,
            reward: finite(c.reward),
            rank_score: c.rank_score.and_then(finite),
        }
    }
}

/// One optimizer iteration as reported on the wire. Rewards that are
/// not finite (no safe candidate yet, unsafe candidates) become `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationReport {
    pub iteration: u32,
    pub position: PointXY,
    pub sigmas: StepState,
    pub best_reward: Option<f64>,
    pub no_improve_count: u32,
    pub improved: bool,
    pub candidates: Vec<CandidateReport>,
    #[serde(default)]
    pub chosen_index: Option<usize>,
}

impl From<&HistoryEntry> for IterationReport {
    fn from(h: &HistoryEntry) -> Self {
        Self {
            iteration: h.iteration,
            position: h.position.into(),
            sigmas: h.sigmas,
            best_reward: finite(h.best_reward),
            no_improve_count: h.no_improve_count,
            improved: h.improved,
            candidates: h.candidates.iter().map(CandidateReport::from).collect(),
            chosen_index: h.chosen.map(|c| c.index),
        }
    }
}

/// Summary attached to an end-of-run report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub start: PointXY,
    pub final_position: PointXY,
    pub best_reward: Option<f64>,
    pub iterations: u32,
    pub stop_reason: StopReason,
    pub sigmas: StepState,
    pub cvi_before: Option<f64>,
    pub cvi_after: Option<f64>,
    pub before: Option<BTreeMap<String, f64>>,
    #[serde(default)]
    pub after: Option<BTreeMap<String, f64>>,
    #[serde(default)]
    pub history: Vec<IterationReport>,
}

/// Report published on the end topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndMessage {
    #[serde(rename = "type")]
    pub kind: EndKind,
    pub optimization_result: OptimizationResult,
    pub ts: String,
    pub sender: String,
}

/// Everything the session needs to report a finished run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub start: Position,
    pub summary: RunSummary,
    pub before: FeatureVector,
    pub after: Option<FeatureVector>,
    pub cvi_before: f64,
    pub cvi_after: Option<f64>,
    pub history: Vec<HistoryEntry>,
}

impl RunReport {
    pub fn kind(&self) -> EndKind {
        match self.summary.stop_reason {
            StopReason::Cancelled => EndKind::Stopped,
            StopReason::MaxIterations | StopReason::Patience => EndKind::End,
        }
    }

    pub fn to_end_message(&self, sender: &str) -> EndMessage {
        EndMessage {
            kind: self.kind(),
            optimization_result: OptimizationResult {
                start: self.start.into(),
                final_position: self.summary.position.into(),
                best_reward: finite(self.summary.best_reward),
                iterations: self.summary.iterations,
                stop_reason: self.summary.stop_reason,
                sigmas: self.summary.sigmas,
                cvi_before: finite(self.cvi_before),
                cvi_after: self.cvi_after.and_then(finite),
                before: Some(self.before.to_map()),
                after: self.after.map(|f| f.to_map()),
                history: self.history.iter().map(IterationReport::from).collect(),
            },
            ts: now_ts(),
            sender: sender.to_string(),
        }
    }
}
