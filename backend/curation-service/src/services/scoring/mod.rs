// ============================================
// Scoring Pipeline (打分)
// ============================================
//
// Per candidate:
// - long_term   = cos(profile, candidate)
// - short_term  = decay-weighted mean of cos(candidate, recent_positive[i]),
//                 positive similarities only
// - freshness   = max(0, 1 - recency slot)
// - penalty     = max cos(candidate, recent_negative[i])
// - exploration = ucb_weight * ucb + freshness_weight * freshness
//
// Candidates whose penalty reaches the negative threshold are dropped here
// and never reach selection.

use crate::config::ScoringWeights;
use crate::models::{CandidateItem, ComponentScores, InteractionHistory, ScoredCandidate};
use crate::services::vector_math;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct ScoredPool {
    pub candidates: Vec<ScoredCandidate>,
    pub filtered_by_negative: usize,
}

pub struct ScoringPipeline {
    weights: ScoringWeights,
}

impl ScoringPipeline {
    pub fn new(weights: ScoringWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &ScoringWeights {
        &self.weights
    }

    /// Score every candidate and drop the ones too close to negative feedback.
    ///
    /// `ucb` is keyed by candidate id; missing ids score 0.
    pub fn score(
        &self,
        pool: &[CandidateItem],
        profile: &[f64],
        history: &InteractionHistory,
        ucb: &HashMap<String, f64>,
    ) -> ScoredPool {
        if pool.is_empty() {
            return ScoredPool::default();
        }

        let mut profile = profile.to_vec();
        if let Some(slot) = profile.last_mut() {
            *slot = 0.0;
        }

        let items: Vec<CandidateItem> = pool
            .iter()
            .cloned()
            .map(|mut item| {
                item.refresh_recency();
                item
            })
            .collect();

        let embeddings: Vec<&[f64]> = items.iter().map(|i| i.embedding.as_slice()).collect();
        let broadcast: Vec<&[f64]> = vec![profile.as_slice(); items.len()];
        let long_term = vector_math::bulk_cosine_similarity(&embeddings, &broadcast)
            .unwrap_or_else(|_| vec![0.0; items.len()]);

        let mut filtered_by_negative = 0;
        let mut candidates = Vec::with_capacity(items.len());

        for (item, long_term_relevance) in items.into_iter().zip(long_term) {
            let negative_penalty = negative_penalty(&item.embedding, &history.recent_negative);
            if negative_penalty >= self.weights.negative_filter_threshold {
                filtered_by_negative += 1;
                continue;
            }

            let short_term_relevance = short_term_relevance(
                &item.embedding,
                &history.recent_positive,
                self.weights.short_term_decay,
            );
            let freshness_score = freshness(&item);
            let ucb = ucb
                .get(&item.id)
                .copied()
                .filter(|v| v.is_finite())
                .unwrap_or(0.0);
            let exploration_score =
                self.weights.ucb_weight * ucb + self.weights.freshness_weight * freshness_score;

            candidates.push(ScoredCandidate {
                item,
                scores: ComponentScores {
                    long_term_relevance,
                    short_term_relevance,
                    exploration_score,
                    freshness_score,
                    negative_penalty,
                    ucb,
                },
            });
        }

        debug!(
            pool = pool.len(),
            kept = candidates.len(),
            filtered_by_negative = filtered_by_negative,
            "Candidates scored"
        );

        ScoredPool {
            candidates,
            filtered_by_negative,
        }
    }
}

/// Decay-weighted average similarity to recent positives (index 0 = newest).
/// Non-positive similarities are left out of both sums, not clamped.
pub fn short_term_relevance(candidate: &[f64], recent_positive: &[Vec<f64>], decay: f64) -> f64 {
    let sims = vector_math::one_to_many(candidate, recent_positive);

    let mut weighted = 0.0;
    let mut total_weight = 0.0;
    let mut weight = 1.0;
    for sim in sims {
        if sim > 0.0 {
            weighted += weight * sim;
            total_weight += weight;
        }
        weight *= decay;
    }

    if total_weight > 0.0 {
        weighted / total_weight
    } else {
        0.0
    }
}

/// Highest similarity to any negative-feedback embedding; 0 with no negatives
pub fn negative_penalty(candidate: &[f64], recent_negative: &[Vec<f64>]) -> f64 {
    vector_math::one_to_many(candidate, recent_negative)
        .into_iter()
        .fold(None, |max: Option<f64>, sim| {
            Some(max.map_or(sim, |m| m.max(sim)))
        })
        .unwrap_or(0.0)
}

fn freshness(item: &CandidateItem) -> f64 {
    item.recency().map(|r| (1.0 - r).max(0.0)).unwrap_or(0.0)
}
