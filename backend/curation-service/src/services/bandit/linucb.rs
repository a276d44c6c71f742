// ============================================
// Disjoint Linear UCB (LinUCB)
// ============================================
//
// Expected reward is linear in the item embedding x:
//
//   θ̂   = A⁻¹ b
//   UCB = xᵀθ̂ + α · sqrt(xᵀ A⁻¹ x)
//
// Update on feedback:
//
//   A += x xᵀ
//   b += reward · x
//
// A⁻¹ is computed once per score() batch; inversion is O(D³) and must never
// run per candidate.

use super::{BanditModelState, Result};
use crate::models::{CandidateItem, UcbScore};
use crate::services::vector_math;
use ndarray::{ArrayView1, Axis};
use tracing::{debug, warn};

/// Result of scoring one batch of candidates
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreOutcome {
    /// One entry per input candidate, in input order
    pub scores: Vec<UcbScore>,
    /// Candidates whose embedding did not match the model dimension (ucb = 0)
    pub skipped: usize,
    /// A could not be inverted; every ucb is 0
    pub degraded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied,
    DimensionMismatch { expected: usize, actual: usize },
    NonFinite,
}

impl UpdateOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateOutcome::Applied => "applied",
            UpdateOutcome::DimensionMismatch { .. } => "dimension_mismatch",
            UpdateOutcome::NonFinite => "non_finite",
        }
    }
}

/// Stateless LinUCB math; the model itself is passed in
#[derive(Debug, Clone)]
pub struct LinUcbEngine {
    ctr_alpha_boost: f64,
}

impl Default for LinUcbEngine {
    fn default() -> Self {
        Self {
            ctr_alpha_boost: 0.5,
        }
    }
}

impl LinUcbEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ctr_alpha_boost(mut self, boost: f64) -> Self {
        self.ctr_alpha_boost = boost;
        self
    }

    /// Exploration weight for this call.
    /// Subjects that rarely click get a wider confidence bonus.
    pub fn effective_alpha(&self, base_alpha: f64, user_ctr: Option<f64>) -> f64 {
        match user_ctr {
            Some(ctr) if ctr.is_finite() => {
                base_alpha + (1.0 - ctr.clamp(0.0, 1.0)) * self.ctr_alpha_boost
            }
            _ => base_alpha,
        }
    }

    /// Score a batch of candidates against the model.
    ///
    /// Mismatched candidates get `ucb = 0`. A singular or non-finite model
    /// degrades the whole batch to `ucb = 0` instead of failing. Only a state
    /// whose buffers do not match its dimension is an error.
    pub fn score(
        &self,
        state: &BanditModelState,
        candidates: &[CandidateItem],
        user_ctr: Option<f64>,
    ) -> Result<ScoreOutcome> {
        state.validate()?;
        let d = state.dimension;

        let zeroed = |degraded: bool, skipped: usize| ScoreOutcome {
            scores: candidates
                .iter()
                .map(|c| UcbScore {
                    id: c.id.clone(),
                    ucb: 0.0,
                })
                .collect(),
            skipped,
            degraded,
        };

        if candidates.is_empty() {
            return Ok(zeroed(false, 0));
        }

        let mismatched = || candidates.iter().filter(|c| c.embedding.len() != d).count();

        if !state.is_finite() {
            warn!(
                dimension = d,
                candidates = candidates.len(),
                "Bandit model holds non-finite values, exploration disabled for batch"
            );
            return Ok(zeroed(true, mismatched()));
        }

        let a_inv = match vector_math::invert(state.a_matrix()?) {
            Ok(inv) => inv,
            Err(e) => {
                warn!(
                    dimension = d,
                    error = %e,
                    candidates = candidates.len(),
                    "Bandit matrix inversion failed, exploration disabled for batch"
                );
                return Ok(zeroed(true, mismatched()));
            }
        };

        let theta = vector_math::mat_vec(a_inv.view(), state.b_vector())?;
        let alpha = self.effective_alpha(state.alpha, user_ctr);

        let mut skipped = 0;
        let scores = candidates
            .iter()
            .map(|candidate| {
                if candidate.embedding.len() != d
                    || !vector_math::is_finite_vector(&candidate.embedding)
                {
                    skipped += 1;
                    return UcbScore {
                        id: candidate.id.clone(),
                        ucb: 0.0,
                    };
                }

                let x = ArrayView1::from(&candidate.embedding);
                let mean = x.dot(&theta);
                let variance = x.dot(&a_inv.dot(&x));
                // A⁻¹ is PD; tiny negatives are rounding noise
                let ucb = mean + alpha * variance.max(0.0).sqrt();

                UcbScore {
                    id: candidate.id.clone(),
                    ucb,
                }
            })
            .collect();

        if skipped > 0 {
            warn!(
                dimension = d,
                skipped = skipped,
                "Skipped candidates with mismatched embedding dimension"
            );
        }

        debug!(
            candidates = candidates.len(),
            skipped = skipped,
            alpha = alpha,
            "LinUCB batch scored"
        );

        Ok(ScoreOutcome {
            scores,
            skipped,
            degraded: false,
        })
    }

    /// Apply one observation: `A += xxᵀ`, `b += reward·x`.
    ///
    /// Mismatched or non-finite input leaves the state untouched, and so does
    /// an update whose result would overflow: the new A and b are built aside
    /// and only committed when every entry is finite.
    pub fn update(
        &self,
        state: &mut BanditModelState,
        embedding: &[f64],
        reward: f64,
    ) -> Result<UpdateOutcome> {
        state.validate()?;
        let d = state.dimension;

        if embedding.len() != d {
            warn!(
                expected = d,
                actual = embedding.len(),
                "Bandit update skipped: embedding dimension mismatch"
            );
            return Ok(UpdateOutcome::DimensionMismatch {
                expected: d,
                actual: embedding.len(),
            });
        }

        if !reward.is_finite() || !vector_math::is_finite_vector(embedding) {
            warn!(reward = reward, "Bandit update skipped: non-finite input");
            return Ok(UpdateOutcome::NonFinite);
        }

        if !state.is_finite() {
            warn!(dimension = d, "Bandit update skipped: stored model is non-finite");
            return Ok(UpdateOutcome::NonFinite);
        }

        let x = ArrayView1::from(embedding);
        let outer = x
            .insert_axis(Axis(1))
            .dot(&x.insert_axis(Axis(0)));
        let next_a = &state.a_matrix()? + &outer;
        let next_b: Vec<f64> = state
            .b
            .iter()
            .zip(embedding)
            .map(|(bi, xi)| bi + reward * xi)
            .collect();

        if !next_a.iter().all(|v| v.is_finite()) || !vector_math::is_finite_vector(&next_b) {
            warn!(reward = reward, "Bandit update skipped: result overflows");
            return Ok(UpdateOutcome::NonFinite);
        }

        state.a_matrix_mut()?.assign(&next_a);
        state.b = next_b;

        Ok(UpdateOutcome::Applied)
    }
}
