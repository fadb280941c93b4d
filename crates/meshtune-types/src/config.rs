// ─────────────────────────────────────────────────────────────────────
// Mesh Tuner Kernel — Configuration
// ─────────────────────────────────────────────────────────────────────

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{TuneError, TuneResult};
use crate::record::Position;

/// Weights of the five Composite Vibration Index components.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CviWeights {
    /// Time-domain RMS (overall vibration magnitude).
    pub w_trms: f64,
    /// Time-domain crest factor (impact suppression).
    pub w_tcf: f64,
    /// Power-spectrum RMS.
    pub w_frms: f64,
    /// Power-spectrum skewness.
    pub w_fsk: f64,
    /// Power-spectrum kurtosis.
    pub w_fkurt: f64,
}

impl Default for CviWeights {
    fn default() -> Self {
        Self {
            w_trms: 1.0,
            w_tcf: 0.5,
            w_frms: 0.6,
            w_fsk: 0.2,
            w_fkurt: 0.3,
        }
    }
}

impl CviWeights {
    /// Weights in component order: trms, tcf, frms, fsk, fkurt.
    pub fn as_array(&self) -> [f64; 5] {
        [self.w_trms, self.w_tcf, self.w_frms, self.w_fsk, self.w_fkurt]
    }
}

/// Reference baselines (acceptance limits or initial assembly) used to
/// normalise each CVI component.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpecRefs {
    pub time_rms: f64,
    pub time_cf: f64,
    pub frms: f64,
    pub fskew: f64,
    pub fkurt: f64,
}

impl Default for SpecRefs {
    fn default() -> Self {
        Self {
            time_rms: 2.0,
            time_cf: 5.0,
            frms: 0.02,
            fskew: 10.0,
            fkurt: 1000.0,
        }
    }
}

/// Hard limits above which a measurement is classified unsafe.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyThresholds {
    pub time_rms_max: f64,
    pub time_cf_max: f64,
}

impl Default for SafetyThresholds {
    fn default() -> Self {
        Self {
            time_rms_max: 5.0,
            time_cf_max: 10.0,
        }
    }
}

/// Mechanical travel limits of the positioning stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Limits {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
}

impl Limits {
    pub fn new(x_min: f64, x_max: f64, y_min: f64, y_max: f64) -> Self {
        Self {
            x_min,
            x_max,
            y_min,
            y_max,
        }
    }

    /// Clamp a position into the limits. NaN coordinates map to the lower bound.
    pub fn clamp(&self, p: Position) -> Position {
        let x = if p.x.is_nan() { self.x_min } else { p.x.clamp(self.x_min, self.x_max) };
        let y = if p.y.is_nan() { self.y_min } else { p.y.clamp(self.y_min, self.y_max) };
        Position { x, y }
    }

    pub fn contains(&self, p: Position) -> bool {
        (self.x_min..=self.x_max).contains(&p.x) && (self.y_min..=self.y_max).contains(&p.y)
    }

    pub fn validate(&self) -> TuneResult<()> {
        let finite = [self.x_min, self.x_max, self.y_min, self.y_max]
            .iter()
            .all(|v| v.is_finite());
        if !finite {
            return Err(TuneError::Config("limits must be finite".to_string()));
        }
        if self.x_min > self.x_max || self.y_min > self.y_max {
            return Err(TuneError::Config(format!(
                "limits must be ordered, got x=[{}, {}] y=[{}, {}]",
                self.x_min, self.x_max, self.y_min, self.y_max
            )));
        }
        Ok(())
    }
}

/// Trust-region step sizing for the triangular candidate pattern.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepConfig {
    /// Initial X radius.
    pub sig_x: f64,
    /// Initial Y radius.
    pub sig_y: f64,
    pub sig_x_min: f64,
    pub sig_y_min: f64,
    pub sig_x_max: f64,
    pub sig_y_max: f64,
    /// Growth factor after an improving round (> 1).
    pub up_scale: f64,
    /// Shrink factor after an unsafe or non-improving round (< 1).
    pub down_scale: f64,
}

impl Default for StepConfig {
    fn default() -> Self {
        Self {
            sig_x: 0.05,
            sig_y: 0.05,
            sig_x_min: 0.005,
            sig_y_min: 0.005,
            sig_x_max: 0.3,
            sig_y_max: 0.3,
            up_scale: 1.2,
            down_scale: 0.8,
        }
    }
}

impl StepConfig {
    pub fn validate(&self) -> TuneResult<()> {
        for (axis, min, max) in [
            ("x", self.sig_x_min, self.sig_x_max),
            ("y", self.sig_y_min, self.sig_y_max),
        ] {
            if !(min > 0.0 && min <= max && max.is_finite()) {
                return Err(TuneError::Config(format!(
                    "sig_{axis} bounds must satisfy 0 < min <= max, got [{min}, {max}]"
                )));
            }
        }
        if !self.sig_x.is_finite() || !self.sig_y.is_finite() || self.sig_x <= 0.0 || self.sig_y <= 0.0 {
            return Err(TuneError::Config(format!(
                "initial sigmas must be > 0, got ({}, {})",
                self.sig_x, self.sig_y
            )));
        }
        if !(self.up_scale > 1.0 && self.up_scale.is_finite()) {
            return Err(TuneError::Config(format!(
                "up_scale must be > 1, got {}",
                self.up_scale
            )));
        }
        if !(self.down_scale > 0.0 && self.down_scale < 1.0) {
            return Err(TuneError::Config(format!(
                "down_scale must be in (0, 1), got {}",
                self.down_scale
            )));
        }
        Ok(())
    }
}

/// Point-selection policy for one round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    /// Highest continuous reward (-CVI) wins.
    #[default]
    Continuous,
    /// Lowest weighted per-metric rank wins.
    Rank,
}

/// Optimizer loop parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Low-pass factor of the position update: new = (1-alpha)·old + alpha·winner.
    pub alpha: f64,
    /// Measurements per candidate, reduced by element-wise median.
    pub repeats: u32,
    /// Minimum reward gain that counts as an improvement.
    pub epsilon: f64,
    /// Weight of the squared move distance added to the reward.
    pub lambda_move: f64,
    pub max_iters: u32,
    /// Consecutive non-improving rounds before the run ends.
    pub patience: u32,
    pub selection: SelectionMode,
    /// In rank mode, resolve equal aggregate ranks by continuous reward.
    pub rank_break_ties_with_reward: bool,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            alpha: 0.3,
            repeats: 1,
            epsilon: 1e-3,
            lambda_move: 0.0,
            max_iters: 60,
            patience: 6,
            selection: SelectionMode::Continuous,
            rank_break_ties_with_reward: true,
        }
    }
}

/// Point-query protocol parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Topic namespace: `v1/{device_id}/...`.
    pub device_id: String,
    /// Sender tag stamped on every outbound record.
    pub sender: String,
    /// Per-attempt wait for a matching result.
    pub timeout_ms: u64,
    /// Additional attempts after the first one times out.
    pub retries: u32,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            device_id: "id1".to_string(),
            sender: "A".to_string(),
            timeout_ms: 10_000,
            retries: 3,
        }
    }
}

/// Operator-facing run settings, delivered on the retained settings topic.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub start_x: f64,
    pub start_y: f64,
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
    pub sig_x_min: f64,
    pub sig_y_min: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            start_x: 16.0,
            start_y: -26.0,
            x_min: 18.5,
            x_max: 29.5,
            y_min: -36.5,
            y_max: -25.5,
            sig_x_min: 0.0005,
            sig_y_min: 0.0005,
        }
    }
}

/// Partial settings update. Absent keys keep their current value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsUpdate {
    pub start_x: Option<f64>,
    pub start_y: Option<f64>,
    pub x_min: Option<f64>,
    pub x_max: Option<f64>,
    pub y_min: Option<f64>,
    pub y_max: Option<f64>,
    pub sig_x_min: Option<f64>,
    pub sig_y_min: Option<f64>,
}

impl Settings {
    pub fn limits(&self) -> Limits {
        Limits::new(self.x_min, self.x_max, self.y_min, self.y_max)
    }

    pub fn start(&self) -> Position {
        Position::new(self.start_x, self.start_y)
    }

    /// Merge a partial update key by key. Returns the number of keys applied.
    pub fn merge(&mut self, update: &SettingsUpdate) -> usize {
        let mut changed = 0;
        let fields: [(&mut f64, Option<f64>); 8] = [
            (&mut self.start_x, update.start_x),
            (&mut self.start_y, update.start_y),
            (&mut self.x_min, update.x_min),
            (&mut self.x_max, update.x_max),
            (&mut self.y_min, update.y_min),
            (&mut self.y_max, update.y_max),
            (&mut self.sig_x_min, update.sig_x_min),
            (&mut self.sig_y_min, update.sig_y_min),
        ];
        for (slot, value) in fields {
            if let Some(v) = value {
                *slot = v;
                changed += 1;
            }
        }
        changed
    }

    /// Overlay these settings on a base config, producing the snapshot a
    /// single run uses.
    pub fn apply_to(&self, base: &TunerConfig) -> TuneResult<TunerConfig> {
        let mut cfg = base.clone();
        cfg.settings = *self;
        cfg.steps.sig_x_min = self.sig_x_min;
        cfg.steps.sig_y_min = self.sig_y_min;
        cfg.steps.sig_x_max = cfg.steps.sig_x_max.max(self.sig_x_min);
        cfg.steps.sig_y_max = cfg.steps.sig_y_max.max(self.sig_y_min);
        cfg.validate()?;
        Ok(cfg)
    }
}

/// Complete runtime configuration, constructed once by the caller and
/// passed explicitly into each component.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TunerConfig {
    pub weights: CviWeights,
    pub refs: SpecRefs,
    pub safety: SafetyThresholds,
    pub steps: StepConfig,
    pub optimizer: LoopConfig,
    pub protocol: ProtocolConfig,
    /// Initial settings, replaced by updates from the settings topic.
    pub settings: Settings,
}

impl TunerConfig {
    /// Validate configuration parameters.
    pub fn validate(&self) -> TuneResult<()> {
        for (name, w) in [
            ("w_trms", self.weights.w_trms),
            ("w_tcf", self.weights.w_tcf),
            ("w_frms", self.weights.w_frms),
            ("w_fsk", self.weights.w_fsk),
            ("w_fkurt", self.weights.w_fkurt),
        ] {
            if !(w >= 0.0 && w.is_finite()) {
                return Err(TuneError::Config(format!("{name} must be >= 0, got {w}")));
            }
        }
        for (name, r) in [
            ("time_rms", self.refs.time_rms),
            ("time_cf", self.refs.time_cf),
            ("frms", self.refs.frms),
            ("fskew", self.refs.fskew),
            ("fkurt", self.refs.fkurt),
        ] {
            if !(r > 0.0 && r.is_finite()) {
                return Err(TuneError::Config(format!("ref {name} must be > 0, got {r}")));
            }
        }
        if !(self.safety.time_rms_max > 0.0 && self.safety.time_cf_max > 0.0) {
            return Err(TuneError::Config(format!(
                "safety thresholds must be > 0, got rms={} cf={}",
                self.safety.time_rms_max, self.safety.time_cf_max
            )));
        }
        self.steps.validate()?;
        self.settings.limits().validate()?;
        let opt = &self.optimizer;
        if !(opt.alpha > 0.0 && opt.alpha <= 1.0) {
            return Err(TuneError::Config(format!(
                "alpha must be in (0, 1], got {}",
                opt.alpha
            )));
        }
        if opt.repeats < 1 {
            return Err(TuneError::Config("repeats must be >= 1".to_string()));
        }
        if !(opt.epsilon >= 0.0 && opt.epsilon.is_finite()) {
            return Err(TuneError::Config(format!(
                "epsilon must be >= 0, got {}",
                opt.epsilon
            )));
        }
        if !opt.lambda_move.is_finite() {
            return Err(TuneError::Config("lambda_move must be finite".to_string()));
        }
        if self.protocol.timeout_ms == 0 {
            return Err(TuneError::Config("timeout_ms must be > 0".to_string()));
        }
        if self.protocol.device_id.is_empty() || self.protocol.device_id.contains('/') {
            return Err(TuneError::Config(format!(
                "device_id must be a non-empty topic segment, got {:?}",
                self.protocol.device_id
            )));
        }
        Ok(())
    }

    /// Load from JSON string. Missing sections take their defaults.
    pub fn from_json(json: &str) -> TuneResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| TuneError::Config(format!("JSON parse error: {e}")))
    }

    /// Load from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> TuneResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| TuneError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json(&text)
    }
}
