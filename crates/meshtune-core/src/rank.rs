// ─────────────────────────────────────────────────────────────────────
// Mesh Tuner Kernel — Rank Engine (Weighted Rank Aggregation)
// ─────────────────────────────────────────────────────────────────────
//! Relative selection among the candidates of one round.
//!
//! Each of the five CVI columns is ranked ascending with dense ranking
//! (equal values share a rank, ranks are contiguous from 0, non-finite
//! values rank after every finite one). A candidate's aggregate score is
//! the CVI-weighted sum of its five ranks; lower is better.

use meshtune_types::{CviWeights, TunerConfig};

use crate::reward::CviComponents;

/// Aggregate scores closer than this are considered tied.
pub const TIE_EPS: f64 = 1e-9;

/// Dense ascending ranks of `values`.
pub fn dense_ranks(values: &[f64]) -> Vec<usize> {
    let keyed: Vec<f64> = values
        .iter()
        .map(|&v| if v.is_finite() { v } else { f64::INFINITY })
        .collect();
    let mut distinct = keyed.clone();
    distinct.sort_by(|a, b| a.total_cmp(b));
    distinct.dedup();
    keyed
        .iter()
        .map(|v| distinct.partition_point(|d| d < v))
        .collect()
}

/// Weighted rank aggregator.
#[derive(Debug, Clone, Copy)]
pub struct RankEngine {
    weights: CviWeights,
    break_ties_with_reward: bool,
}

impl RankEngine {
    pub fn new(weights: CviWeights, break_ties_with_reward: bool) -> Self {
        Self {
            weights,
            break_ties_with_reward,
        }
    }

    pub fn from_config(config: &TunerConfig) -> Self {
        Self::new(config.weights, config.optimizer.rank_break_ties_with_reward)
    }

    /// Aggregate rank score per candidate, in input order.
    pub fn scores(&self, components: &[CviComponents]) -> Vec<f64> {
        let w = self.weights.as_array();
        let mut totals = vec![0.0; components.len()];
        for (col, weight) in w.iter().enumerate() {
            let column: Vec<f64> = components.iter().map(|c| c.as_array()[col]).collect();
            for (total, rank) in totals.iter_mut().zip(dense_ranks(&column)) {
                *total += weight * rank as f64;
            }
        }
        totals
    }

    /// Index of the winning safe candidate, or `None` if none is safe.
    ///
    /// The first minimum wins. With tie-breaking enabled, every safe
    /// candidate within [`TIE_EPS`] of the minimum competes on continuous
    /// reward instead (first maximum wins).
    pub fn select(&self, scores: &[f64], rewards: &[f64], safe: &[bool]) -> Option<usize> {
        let safe_idx: Vec<usize> = (0..scores.len()).filter(|&i| safe[i]).collect();
        let mut best = *safe_idx.first()?;
        for &i in &safe_idx[1..] {
            if scores[i] < scores[best] {
                best = i;
            }
        }
        if !self.break_ties_with_reward {
            return Some(best);
        }
        let best_score = scores[best];
        let tied: Vec<usize> = safe_idx
            .into_iter()
            .filter(|&i| (scores[i] - best_score).abs() < TIE_EPS)
            .collect();
        if tied.len() > 1 {
            let mut winner = tied[0];
            for &i in &tied[1..] {
                if rewards[i] > rewards[winner] {
                    winner = i;
                }
            }
            log::debug!("rank tie among {tied:?} broken by reward -> {winner}");
            best = winner;
        }
        Some(best)
    }
}
