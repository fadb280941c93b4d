// ─────────────────────────────────────────────────────────────────────
// Mesh Tuner Kernel — Reward Engine (Composite Vibration Index)
// ─────────────────────────────────────────────────────────────────────
//! Continuous reward from a validated feature vector.
//!
//! Five components, each the max over populated axes, normalised by a
//! reference baseline and compressed with `log1p`:
//!
//! | component          | normalisation                           |
//! |--------------------|-----------------------------------------|
//! | time RMS           | `log1p(v / ref)`                        |
//! | time crest factor  | `log1p(v / ref)`                        |
//! | spectrum RMS       | `log1p(v / ref)`                        |
//! | spectrum skewness  | `log1p(winsor(v / ref, 0, 100))`        |
//! | spectrum kurtosis  | `log1p(winsor(v / ref, 0, 100))`        |
//!
//! `CVI = Σ wᵢ·cᵢ` and `reward = -CVI + λ_move·|prev - candidate|²`.
//! A non-finite CVI yields a reward of `-inf`.

use serde::{Deserialize, Serialize};

use meshtune_types::{CviWeights, FeatureVector, Position, SpecRefs, TunerConfig};

/// Floor for reference baselines.
const REF_EPS: f64 = 1e-12;
/// Upper winsor bound for the heavy-tailed spectrum moments.
const MOMENT_CAP: f64 = 100.0;

/// `log1p` of the non-negative part.
#[inline]
pub fn log1p_compress(v: f64) -> f64 {
    v.max(0.0).ln_1p()
}

#[inline]
fn winsor(v: f64, lo: f64, hi: f64) -> f64 {
    if v < lo {
        lo
    } else if v > hi {
        hi
    } else {
        v
    }
}

#[inline]
fn ratio(value: f64, reference: f64) -> f64 {
    value / reference.max(REF_EPS)
}

/// The five normalised CVI components of one measurement.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CviComponents {
    pub time_rms: f64,
    pub time_crest_factor: f64,
    pub spectrum_rms: f64,
    pub spectrum_skewness: f64,
    pub spectrum_kurtosis: f64,
}

impl CviComponents {
    /// Components in weight order: trms, tcf, frms, fsk, fkurt.
    pub fn as_array(&self) -> [f64; 5] {
        [
            self.time_rms,
            self.time_crest_factor,
            self.spectrum_rms,
            self.spectrum_skewness,
            self.spectrum_kurtosis,
        ]
    }

    pub fn is_finite(&self) -> bool {
        self.as_array().iter().all(|v| v.is_finite())
    }
}

/// Deterministic CVI / reward calculator.
#[derive(Debug, Clone, Copy)]
pub struct RewardEngine {
    weights: CviWeights,
    refs: SpecRefs,
    lambda_move: f64,
}

impl RewardEngine {
    pub fn new(weights: CviWeights, refs: SpecRefs, lambda_move: f64) -> Self {
        Self {
            weights,
            refs,
            lambda_move,
        }
    }

    pub fn from_config(config: &TunerConfig) -> Self {
        Self::new(config.weights, config.refs, config.optimizer.lambda_move)
    }

    pub fn weights(&self) -> &CviWeights {
        &self.weights
    }

    /// Normalised, compressed components.
    pub fn components(&self, f: &FeatureVector) -> CviComponents {
        let r = &self.refs;
        let trms = f.max_over_axes(|a| a.time_rms);
        let tcf = f.max_over_axes(|a| a.time_crest_factor);
        let frms = f.max_over_axes(|a| a.spectrum_rms);
        let fsk = f.max_over_axes(|a| a.spectrum_skewness);
        let fkurt = f.max_over_axes(|a| a.spectrum_kurtosis);

        CviComponents {
            time_rms: log1p_compress(ratio(trms, r.time_rms)),
            time_crest_factor: log1p_compress(ratio(tcf, r.time_cf)),
            spectrum_rms: log1p_compress(ratio(frms, r.frms)),
            spectrum_skewness: log1p_compress(winsor(ratio(fsk, r.fskew), 0.0, MOMENT_CAP)),
            spectrum_kurtosis: log1p_compress(winsor(ratio(fkurt, r.fkurt), 0.0, MOMENT_CAP)),
        }
    }

    /// Weighted sum of components. Lower is better.
    pub fn cvi_of(&self, c: &CviComponents) -> f64 {
        self.weights
            .as_array()
            .iter()
            .zip(c.as_array())
            .map(|(w, v)| w * v)
            .sum()
    }

    pub fn cvi(&self, f: &FeatureVector) -> f64 {
        self.cvi_of(&self.components(f))
    }

    /// Movement term added to the reward.
    pub fn move_penalty(&self, prev: Position, candidate: Position) -> f64 {
        self.lambda_move * prev.squared_distance(candidate)
    }

    /// `-CVI + move_penalty`; `-inf` if the CVI is not finite.
    pub fn reward(&self, f: &FeatureVector, prev: Position, candidate: Position) -> f64 {
        let cvi = self.cvi(f);
        if !cvi.is_finite() {
            log::warn!(
                "non-finite CVI at ({:.4}, {:.4}), scoring as worst",
                candidate.x,
                candidate.y
            );
            return f64::NEG_INFINITY;
        }
        -cvi + self.move_penalty(prev, candidate)
    }
}

/// Index of the highest-reward safe candidate; the first maximum wins.
pub fn select_by_reward(rewards: &[f64], safe: &[bool]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, &r) in rewards.iter().enumerate() {
        if !safe[i] {
            continue;
        }
        match best {
            Some(b) if r <= rewards[b] => {}
            _ => best = Some(i),
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use meshtune_types::AxisFeatures;

    use super::*;

    fn engine() -> RewardEngine {
        RewardEngine::new(CviWeights::default(), SpecRefs::default(), 0.0)
    }

    fn baseline() -> AxisFeatures {
        AxisFeatures {
            time_rms: 1.0,
            time_crest_factor: 3.0,
            time_skewness: 0.0,
            time_kurtosis: 3.0,
            spectrum_rms: 0.02,
            spectrum_skewness: 5.0,
            spectrum_kurtosis: 200.0,
            spectrum_crest_factor: 4.0,
        }
    }

    #[test]
    fn test_components_at_reference_equal_ln2() {
        let e = engine();
        let f = FeatureVector::from_x(AxisFeatures {
            time_rms: 2.0,
            time_crest_factor: 5.0,
            spectrum_rms: 0.02,
            spectrum_skewness: 10.0,
            spectrum_kurtosis: 1000.0,
            ..baseline()
        });
        for c in e.components(&f).as_array() {
            assert!((c - std::f64::consts::LN_2).abs() < 1e-12);
        }
        let expected = 2.6 * std::f64::consts::LN_2;
        assert!((e.cvi(&f) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_negative_values_compress_to_zero() {
        let e = engine();
        let f = FeatureVector::from_x(AxisFeatures {
            spectrum_skewness: -30.0,
            ..baseline()
        });
        assert_eq!(e.components(&f).spectrum_skewness, 0.0);
    }

    #[test]
    fn test_moments_are_winsorized() {
        let e = engine();
        let huge = FeatureVector::from_x(AxisFeatures {
            spectrum_kurtosis: 1e12,
            ..baseline()
        });
        let capped = FeatureVector::from_x(AxisFeatures {
            spectrum_kurtosis: 1000.0 * MOMENT_CAP,
            ..baseline()
        });
        assert_eq!(
            e.components(&huge).spectrum_kurtosis,
            e.components(&capped).spectrum_kurtosis
        );
    }

    #[test]
    fn test_reward_monotone_in_vibration() {
        let e = engine();
        let p = Position::default();
        let mut last = f64::INFINITY;
        for rms in [0.1, 0.5, 1.0, 2.0, 4.0] {
            let f = FeatureVector::from_x(AxisFeatures {
                time_rms: rms,
                ..baseline()
            });
            let r = e.reward(&f, p, p);
            assert!(r <= last, "reward rose from {last} to {r} at rms={rms}");
            last = r;
        }
    }

    #[test]
    fn test_cvi_monotone_in_each_component() {
        let e = engine();
        let base = CviComponents {
            time_rms: 0.5,
            time_crest_factor: 0.5,
            spectrum_rms: 0.5,
            spectrum_skewness: 0.5,
            spectrum_kurtosis: 0.5,
        };
        let c0 = e.cvi_of(&base);
        for k in 0..5 {
            let mut arr = base.as_array();
            arr[k] += 0.25;
            let bumped = CviComponents {
                time_rms: arr[0],
                time_crest_factor: arr[1],
                spectrum_rms: arr[2],
                spectrum_skewness: arr[3],
                spectrum_kurtosis: arr[4],
            };
            assert!(e.cvi_of(&bumped) >= c0);
        }
    }

    #[test]
    fn test_move_penalty_added() {
        let e = RewardEngine::new(CviWeights::default(), SpecRefs::default(), 0.5);
        let f = FeatureVector::from_x(baseline());
        let prev = Position::new(0.0, 0.0);
        let cand = Position::new(1.0, 1.0);
        let r0 = engine().reward(&f, prev, cand);
        let r1 = e.reward(&f, prev, cand);
        assert!((r1 - r0 - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_non_finite_reward_is_worst() {
        let e = engine();
        let f = FeatureVector::from_x(AxisFeatures {
            spectrum_rms: f64::NAN,
            ..baseline()
        });
        let p = Position::default();
        assert_eq!(e.reward(&f, p, p), f64::NEG_INFINITY);
    }

    #[test]
    fn test_max_over_axes_used() {
        let e = engine();
        let x_only = FeatureVector::from_x(baseline());
        let mut with_y = x_only;
        with_y.y = Some(AxisFeatures {
            spectrum_rms: 0.2,
            ..baseline()
        });
        assert!(e.cvi(&with_y) > e.cvi(&x_only));
    }

    #[test]
    fn test_select_by_reward_skips_unsafe() {
        let rewards = [-0.1, -0.5, -0.3];
        assert_eq!(select_by_reward(&rewards, &[true; 3]), Some(0));
        assert_eq!(select_by_reward(&rewards, &[false, true, true]), Some(2));
        assert_eq!(select_by_reward(&rewards, &[false; 3]), None);
    }

    #[test]
    fn test_select_by_reward_first_maximum_wins() {
        let rewards = [-1.0, -0.2, -0.2];
        assert_eq!(select_by_reward(&rewards, &[true; 3]), Some(1));
    }
}
