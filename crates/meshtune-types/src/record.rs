// ─────────────────────────────────────────────────────────────────────
// Mesh Tuner Kernel — Search State Records
// ─────────────────────────────────────────────────────────────────────

use serde::{Deserialize, Serialize};

/// A point in the two-axis offset plane.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn offset(self, dx: f64, dy: f64) -> Self {
        Self::new(self.x + dx, self.y + dy)
    }

    pub fn squared_distance(self, other: Position) -> f64 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        dx * dx + dy * dy
    }

    /// Low-pass blend: `(1 - alpha)·self + alpha·target`.
    pub fn blend(self, target: Position, alpha: f64) -> Self {
        Self::new(
            (1.0 - alpha) * self.x + alpha * target.x,
            (1.0 - alpha) * self.y + alpha * target.y,
        )
    }
}

/// Per-axis trust-region radius of the candidate triangle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StepState {
    pub sig_x: f64,
    pub sig_y: f64,
}

/// Debug record of one measured candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub x: f64,
    pub y: f64,
    #[serde(rename = "unsafe")]
    pub unsafe_: bool,
    /// Continuous reward; `-inf` for unsafe candidates.
    pub reward: f64,
    /// Aggregate rank score, rank mode only.
    pub rank_score: Option<f64>,
}

/// The candidate a round selected.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChosenPoint {
    pub index: usize,
    pub x: f64,
    pub y: f64,
    pub reward: f64,
}

/// One completed iteration of the optimizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub iteration: u32,
    pub position: Position,
    pub sigmas: StepState,
    pub best_reward: f64,
    pub no_improve_count: u32,
    pub improved: bool,
    pub candidates: Vec<CandidateRecord>,
    pub chosen: Option<ChosenPoint>,
}

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    MaxIterations,
    Patience,
    Cancelled,
}

/// Final result of `OptimizerLoop::run`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub position: Position,
    pub best_reward: f64,
    pub iterations: u32,
    pub sigmas: StepState,
    pub stop_reason: StopReason,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blend_endpoints() {
        let a = Position::new(0.0, 0.0);
        let b = Position::new(1.0, -2.0);
        assert_eq!(a.blend(b, 0.0), a);
        assert_eq!(a.blend(b, 1.0), b);
        let mid = a.blend(b, 0.3);
        assert!((mid.x - 0.3).abs() < 1e-12);
        assert!((mid.y + 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_squared_distance() {
        let a = Position::new(1.0, 1.0);
        assert_eq!(a.squared_distance(a.offset(3.0, 4.0)), 25.0);
    }

    #[test]
    fn test_stop_reason_serialises_snake_case() {
        let json = serde_json::to_string(&StopReason::MaxIterations).unwrap();
        assert_eq!(json, "\"max_iterations\"");
    }
}
