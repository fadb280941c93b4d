// ─────────────────────────────────────────────────────────────────────
// Mesh Tuner Kernel — Optimizer Loop (Trust-Region Triangle Search)
// ─────────────────────────────────────────────────────────────────────
//! Derivative-free local search over the two-axis offset plane.
//!
//! One iteration samples three candidates around the current position,
//! measures them strictly in order, discards the unsafe ones, picks a
//! winner (continuous reward or weighted rank), adapts the trust region
//! and moves a fraction `alpha` of the way towards the winner.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use meshtune_types::{
    CandidateRecord, ChosenPoint, FeatureVector, HistoryEntry, Limits, Position, RunSummary,
    SelectionMode, StepState, StopReason, TuneResult, TunerConfig,
};

use crate::oracle::MeasurementOracle;
use crate::rank::RankEngine;
use crate::reward::{select_by_reward, CviComponents, RewardEngine};
use crate::safety::SafetyGate;
use crate::sampler::sample_candidates;
use crate::step::StepController;

/// Cooperative cancellation token shared between a run and its owner.
///
/// Checked only at iteration boundaries; a measurement in flight always
/// completes (or times out) first.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// What a single `iterate()` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationStatus {
    Advanced,
    Cancelled,
}

/// One candidate after its repeats were measured.
struct Measured {
    features: FeatureVector,
    unsafe_: bool,
}

pub struct OptimizerLoop {
    config: TunerConfig,
    oracle: Arc<dyn MeasurementOracle>,
    gate: SafetyGate,
    reward: RewardEngine,
    rank: RankEngine,
    steps: StepController,
    limits: Limits,
    position: Position,
    step: StepState,
    best_reward: f64,
    no_improve_count: u32,
    iteration: u32,
    history: Vec<HistoryEntry>,
    cancel: CancelFlag,
}

impl OptimizerLoop {
    /// Build a loop from a validated config snapshot. The start position
    /// comes from `config.settings` and is clamped into its limits.
    pub fn new(config: TunerConfig, oracle: Arc<dyn MeasurementOracle>) -> TuneResult<Self> {
        config.validate()?;
        let limits = config.settings.limits();
        let requested = config.settings.start();
        let position = limits.clamp(requested);
        if position != requested {
            log::warn!(
                "start ({:.4}, {:.4}) outside limits, clamped to ({:.4}, {:.4})",
                requested.x,
                requested.y,
                position.x,
                position.y
            );
        }
        let steps = StepController::from_config(&config);
        Ok(Self {
            gate: SafetyGate::from_config(&config),
            reward: RewardEngine::from_config(&config),
            rank: RankEngine::from_config(&config),
            step: steps.initial(),
            steps,
            limits,
            position,
            best_reward: f64::NEG_INFINITY,
            no_improve_count: 0,
            iteration: 0,
            history: Vec::new(),
            cancel: CancelFlag::new(),
            oracle,
            config,
        })
    }

    /// Share an externally owned cancellation flag.
    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn config(&self) -> &TunerConfig {
        &self.config
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn step(&self) -> StepState {
        self.step
    }

    pub fn best_reward(&self) -> f64 {
        self.best_reward
    }

    pub fn no_improve_count(&self) -> u32 {
        self.no_improve_count
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub fn reward_engine(&self) -> &RewardEngine {
        &self.reward
    }

    /// Measure `at` K times and reduce by median. Stops at the first
    /// repeat that trips the safety gate and returns that measurement.
    fn measure_candidate(&self, at: Position) -> TuneResult<Measured> {
        let repeats = self.config.optimizer.repeats.max(1) as usize;
        let mut batch = Vec::with_capacity(repeats);
        for _ in 0..repeats {
            let features = self.oracle.measure(at)?;
            if self.gate.is_unsafe(&features) {
                return Ok(Measured {
                    features,
                    unsafe_: true,
                });
            }
            batch.push(features);
        }
        Ok(Measured {
            features: FeatureVector::median(&batch)?,
            unsafe_: false,
        })
    }

    /// Run one round. Measurement errors abort the round without
    /// touching the search state.
    pub fn iterate(&mut self) -> TuneResult<IterationStatus> {
        if self.cancel.is_cancelled() {
            log::info!("cancellation requested before iteration {}", self.iteration + 1);
            return Ok(IterationStatus::Cancelled);
        }

        let prev = self.position;
        let candidates = sample_candidates(prev, self.step, &self.limits);
        let mut measured = Vec::with_capacity(candidates.len());
        for c in candidates {
            measured.push(self.measure_candidate(c)?);
        }

        let safe: Vec<bool> = measured.iter().map(|m| !m.unsafe_).collect();
        let rewards: Vec<f64> = measured
            .iter()
            .zip(candidates)
            .map(|(m, c)| {
                if m.unsafe_ {
                    f64::NEG_INFINITY
                } else {
                    self.reward.reward(&m.features, prev, c)
                }
            })
            .collect();
        let rank_scores = match self.config.optimizer.selection {
            SelectionMode::Rank => {
                let components: Vec<CviComponents> = measured
                    .iter()
                    .map(|m| self.reward.components(&m.features))
                    .collect();
                Some(self.rank.scores(&components))
            }
            SelectionMode::Continuous => None,
        };

        self.iteration += 1;
        if safe.iter().any(|s| !s) {
            self.step = self.steps.shrink(self.step);
        }

        let winner = if safe.iter().all(|s| !s) {
            log::warn!(
                "iter {}: all candidates unsafe, holding ({:.4}, {:.4})",
                self.iteration,
                prev.x,
                prev.y
            );
            self.no_improve_count += 1;
            None
        } else {
            match &rank_scores {
                Some(scores) => self.rank.select(scores, &rewards, &safe),
                None => select_by_reward(&rewards, &safe),
            }
        };

        let mut improved = false;
        let chosen = winner.map(|i| {
            let decision = self.steps.after_selection(
                self.step,
                rewards[i],
                self.best_reward,
                self.config.optimizer.epsilon,
            );
            self.step = decision.step;
            improved = decision.improved;
            if improved {
                self.best_reward = rewards[i];
                self.no_improve_count = 0;
            } else {
                self.no_improve_count += 1;
            }
            self.position = self
                .limits
                .clamp(prev.blend(candidates[i], self.config.optimizer.alpha));
            ChosenPoint {
                index: i,
                x: candidates[i].x,
                y: candidates[i].y,
                reward: rewards[i],
            }
        });

        let records = candidates
            .iter()
            .enumerate()
            .map(|(i, c)| CandidateRecord {
                x: c.x,
                y: c.y,
                unsafe_: !safe[i],
                reward: rewards[i],
                rank_score: rank_scores.as_ref().map(|s| s[i]),
            })
            .collect();

        log::info!(
            "iter {:>3} pos=({:.4}, {:.4}) sig=({:.4}, {:.4}) best={:.4} no_imp={} chosen={:?}",
            self.iteration,
            self.position.x,
            self.position.y,
            self.step.sig_x,
            self.step.sig_y,
            self.best_reward,
            self.no_improve_count,
            chosen.map(|c| c.index)
        );

        self.history.push(HistoryEntry {
            iteration: self.iteration,
            position: self.position,
            sigmas: self.step,
            best_reward: self.best_reward,
            no_improve_count: self.no_improve_count,
            improved,
            candidates: records,
            chosen,
        });
        Ok(IterationStatus::Advanced)
    }

    /// Iterate until `max_iters`, `patience` or cancellation.
    pub fn run(&mut self) -> TuneResult<RunSummary> {
        let max_iters = self.config.optimizer.max_iters;
        let patience = self.config.optimizer.patience;
        let stop_reason = loop {
            if self.no_improve_count >= patience {
                break StopReason::Patience;
            }
            if self.iteration >= max_iters {
                break StopReason::MaxIterations;
            }
            if self.iterate()? == IterationStatus::Cancelled {
                break StopReason::Cancelled;
            }
        };
        log::info!(
            "run finished after {} iterations ({:?}), best reward {:.4}",
            self.iteration,
            stop_reason,
            self.best_reward
        );
        Ok(self.summary(stop_reason))
    }

    pub fn summary(&self, stop_reason: StopReason) -> RunSummary {
        RunSummary {
            position: self.position,
            best_reward: self.best_reward,
            iterations: self.iteration,
            sigmas: self.step,
            stop_reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use meshtune_types::{AxisFeatures, TuneError};

    use super::*;
    use crate::oracle::ExternalOracle;

    fn config() -> TunerConfig {
        let mut cfg = TunerConfig::default();
        cfg.settings.start_x = 20.0;
        cfg.settings.start_y = -30.0;
        cfg
    }

    fn bowl(center: Position) -> Arc<dyn MeasurementOracle> {
        Arc::new(ExternalOracle::new(move |p| {
            let d2 = p.squared_distance(center);
            Ok(FeatureVector::from_x(AxisFeatures {
                time_rms: 0.5 + d2,
                time_crest_factor: 3.0,
                spectrum_rms: 0.01 + 0.02 * d2,
                ..AxisFeatures::uniform(1.0)
            }))
        }))
    }

    #[test]
    fn test_start_clamped_into_limits() {
        let mut cfg = config();
        cfg.settings.start_x = 100.0;
        let opt = OptimizerLoop::new(cfg, bowl(Position::default())).unwrap();
        assert_eq!(opt.position().x, 29.5);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut cfg = config();
        cfg.optimizer.alpha = 0.0;
        assert!(matches!(
            OptimizerLoop::new(cfg, bowl(Position::default())),
            Err(TuneError::Config(_))
        ));
    }

    #[test]
    fn test_first_iteration_improves() {
        let mut opt = OptimizerLoop::new(config(), bowl(Position::new(21.0, -30.0))).unwrap();
        assert_eq!(opt.iterate().unwrap(), IterationStatus::Advanced);
        assert!(opt.best_reward().is_finite());
        assert_eq!(opt.no_improve_count(), 0);
        let h = &opt.history()[0];
        assert!(h.improved);
        assert_eq!(h.chosen.map(|c| c.index), Some(0));
        assert!(opt.position().x > 20.0);
    }

    #[test]
    fn test_repeats_use_median() {
        use std::sync::atomic::AtomicUsize;
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let oracle = Arc::new(ExternalOracle::new(move |_| {
            let n = seen.fetch_add(1, Ordering::SeqCst);
            // one outlier per three repeats
            let rms = if n % 3 == 0 { 4.0 } else { 1.0 };
            Ok(FeatureVector::from_x(AxisFeatures {
                time_rms: rms,
                time_crest_factor: 3.0,
                ..AxisFeatures::uniform(0.5)
            }))
        }));
        let mut cfg = config();
        cfg.optimizer.repeats = 3;
        let mut opt = OptimizerLoop::new(cfg.clone(), oracle).unwrap();
        opt.iterate().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 9);

        let clean = RewardEngine::from_config(&cfg).cvi(&FeatureVector::from_x(AxisFeatures {
            time_rms: 1.0,
            time_crest_factor: 3.0,
            ..AxisFeatures::uniform(0.5)
        }));
        assert!((opt.best_reward() + clean).abs() < 1e-9);
    }

    #[test]
    fn test_unsafe_repeat_stops_early() {
        use std::sync::atomic::AtomicUsize;
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let oracle = Arc::new(ExternalOracle::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(FeatureVector::from_x(AxisFeatures {
                time_rms: 9.0,
                ..AxisFeatures::uniform(1.0)
            }))
        }));
        let mut cfg = config();
        cfg.optimizer.repeats = 4;
        let mut opt = OptimizerLoop::new(cfg, oracle).unwrap();
        opt.iterate().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_cancel_flag_shared() {
        let flag = CancelFlag::new();
        let mut opt = OptimizerLoop::new(config(), bowl(Position::default()))
            .unwrap()
            .with_cancel_flag(flag.clone());
        flag.cancel();
        assert!(opt.cancel_flag().is_cancelled());
        assert_eq!(opt.iterate().unwrap(), IterationStatus::Cancelled);
        assert_eq!(opt.iteration(), 0);
        flag.reset();
        assert_eq!(opt.iterate().unwrap(), IterationStatus::Advanced);
    }
}
