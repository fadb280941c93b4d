// ─────────────────────────────────────────────────────────────────────
// Mesh Tuner Kernel — Error Hierarchy
// ─────────────────────────────────────────────────────────────────────

use thiserror::Error;

/// Root error type for all Mesh Tuner failures.
///
/// Every variant except `Config` and `Validation` is fatal to the run in
/// progress: the control session catches it, reports it and returns to idle.
#[derive(Error, Debug)]
pub enum TuneError {
    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Invalid input (position, parameters, settings).
    #[error("validation error: {0}")]
    Validation(String),

    /// No matching result arrived within `timeout × attempts`.
    #[error("transport timeout: req_id={req_id} unanswered after {attempts} attempts")]
    TransportTimeout { req_id: String, attempts: u32 },

    /// Result payload failed schema validation.
    #[error("malformed result: {0}")]
    MalformedResult(String),

    /// The rig reported a measurement failure for this request.
    #[error("remote measurement failed: req_id={req_id}: {message}")]
    RemoteMeasurement { req_id: String, message: String },

    /// Bus is not connected; nothing was published.
    #[error("connection unavailable: {0}")]
    ConnectionUnavailable(String),

    /// Publish or subscribe failed on the message bus.
    #[error("bus error: {0}")]
    Bus(String),

    /// JSON encode/decode failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Numerical error (NaN/Inf where a finite value is required).
    #[error("numerical error: {0}")]
    Numerical(String),
}

impl From<serde_json::Error> for TuneError {
    fn from(e: serde_json::Error) -> Self {
        TuneError::Serialization(e.to_string())
    }
}

pub type TuneResult<T> = Result<T, TuneError>;
