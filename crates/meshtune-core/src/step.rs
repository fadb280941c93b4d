// ─────────────────────────────────────────────────────────────────────
// Mesh Tuner Kernel — Step Controller (Adaptive Trust Region)
// ─────────────────────────────────────────────────────────────────────
//! Growth/shrink policy for the per-axis trust-region radii.
//!
//! The controller is stateless: it maps one `StepState` to the next and
//! every mapping scales first, then clamps into `[sig_min, sig_max]`.

use meshtune_types::{StepConfig, StepState, TunerConfig};

/// Outcome of the post-selection decision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepDecision {
    pub step: StepState,
    pub improved: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct StepController {
    cfg: StepConfig,
}

impl StepController {
    pub fn new(cfg: StepConfig) -> Self {
        Self { cfg }
    }

    pub fn from_config(config: &TunerConfig) -> Self {
        Self::new(config.steps)
    }

    /// Initial radii, clamped into bounds.
    pub fn initial(&self) -> StepState {
        self.clamp(StepState {
            sig_x: self.cfg.sig_x,
            sig_y: self.cfg.sig_y,
        })
    }

    pub fn clamp(&self, s: StepState) -> StepState {
        StepState {
            sig_x: s.sig_x.clamp(self.cfg.sig_x_min, self.cfg.sig_x_max),
            sig_y: s.sig_y.clamp(self.cfg.sig_y_min, self.cfg.sig_y_max),
        }
    }

    pub fn grow(&self, s: StepState) -> StepState {
        self.clamp(StepState {
            sig_x: s.sig_x * self.cfg.up_scale,
            sig_y: s.sig_y * self.cfg.up_scale,
        })
    }

    pub fn shrink(&self, s: StepState) -> StepState {
        self.clamp(StepState {
            sig_x: s.sig_x * self.cfg.down_scale,
            sig_y: s.sig_y * self.cfg.down_scale,
        })
    }

    /// Decide after a selection. Improvement means the winner's continuous
    /// reward beats `best_reward` by more than `epsilon`.
    pub fn after_selection(
        &self,
        s: StepState,
        winner_reward: f64,
        best_reward: f64,
        epsilon: f64,
    ) -> StepDecision {
        if winner_reward > best_reward + epsilon {
            StepDecision {
                step: self.grow(s),
                improved: true,
            }
        } else {
            StepDecision {
                step: self.shrink(s),
                improved: false,
            }
        }
    }
}
