// ============================================
// Curation (打分 + 多樣化選擇)
// ============================================
//
// Wires the stages together for one request:
// pool → BanditService::score (subject-scoped UCB) → ScoringPipeline →
// SelectionEngine → ordered selection.
//
// `select` is the subject-less variant: no bandit, every UCB is 0 and the
// exploration view is driven by freshness alone.

use crate::config::{ScoringWeights, SelectionConfig};
use crate::metrics::SelectionMetrics;
use crate::models::{CandidateItem, InteractionHistory, SelectionResult, UserProfile};
use crate::services::bandit::{BanditService, Result};
use crate::services::scoring::ScoringPipeline;
use crate::services::selection::SelectionEngine;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

pub struct CurationService {
    bandit: Arc<BanditService>,
    scoring: ScoringPipeline,
    selection: SelectionEngine,
}

impl CurationService {
    pub fn new(
        bandit: Arc<BanditService>,
        weights: ScoringWeights,
        selection: SelectionConfig,
    ) -> Self {
        Self {
            bandit,
            scoring: ScoringPipeline::new(weights),
            selection: SelectionEngine::new(selection),
        }
    }

    pub fn bandit(&self) -> &Arc<BanditService> {
        &self.bandit
    }

    pub fn selection_config(&self) -> &SelectionConfig {
        self.selection.config()
    }

    pub fn select(
        &self,
        pool: &[CandidateItem],
        profile: &[f64],
        history: &InteractionHistory,
        count: usize,
    ) -> SelectionResult {
        self.select_with_ucb(pool, profile, history, &HashMap::new(), count)
    }

    /// Score the pool against the profile owner's bandit, then select
    pub async fn curate(
        &self,
        profile: &UserProfile,
        pool: &[CandidateItem],
        history: &InteractionHistory,
        count: usize,
        user_ctr: Option<f64>,
    ) -> Result<SelectionResult> {
        let subject_id = profile.subject_id.as_str();
        if pool.is_empty() || count == 0 {
            return Ok(SelectionResult::empty());
        }

        // The bandit sees the same recency slot the scoring stage will
        let contexts: Vec<CandidateItem> = pool
            .iter()
            .cloned()
            .map(|mut item| {
                item.refresh_recency();
                item
            })
            .collect();

        let outcome = self.bandit.score(subject_id, &contexts, user_ctr).await?;
        let ucb: HashMap<String, f64> = outcome
            .scores
            .into_iter()
            .map(|s| (s.id, s.ucb))
            .collect();

        debug!(
            subject = subject_id,
            pool = pool.len(),
            skipped = outcome.skipped,
            degraded = outcome.degraded,
            "Bandit scores ready"
        );

        Ok(self.select_with_ucb(pool, &profile.embedding, history, &ucb, count))
    }

    fn select_with_ucb(
        &self,
        pool: &[CandidateItem],
        profile: &[f64],
        history: &InteractionHistory,
        ucb: &HashMap<String, f64>,
        count: usize,
    ) -> SelectionResult {
        let start = Instant::now();

        let scored = self.scoring.score(pool, profile, history, ucb);
        let mut result = self.selection.select(&scored.candidates, count);
        result.stats.filtered_by_negative = scored.filtered_by_negative;

        SelectionMetrics::record_filtered(scored.filtered_by_negative);
        for item in &result.items {
            SelectionMetrics::record_pick(item.bucket.as_str());
        }
        SelectionMetrics::record_duration(start.elapsed().as_secs_f64());

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BanditConfig;
    use crate::db::InMemoryBanditStore;

    fn service(dimension: usize) -> CurationService {
        let bandit = Arc::new(BanditService::new(
            Arc::new(InMemoryBanditStore::new()),
            BanditConfig {
                dimension,
                ..Default::default()
            },
        ));
        CurationService::new(bandit, ScoringWeights::default(), SelectionConfig::default())
    }

    #[test]
    fn test_select_reports_negative_filter() {
        let svc = service(3);
        let pool = vec![
            CandidateItem::new("bad", vec![1.0, 0.0, 0.0]),
            CandidateItem::new("ok", vec![0.0, 1.0, 0.0]),
        ];
        let history = InteractionHistory {
            recent_positive: vec![],
            recent_negative: vec![vec![1.0, 0.0, 0.0]],
        };

        let result = svc.select(&pool, &[1.0, 1.0, 0.0], &history, 5);
        assert_eq!(result.ids(), vec!["ok"]);
        assert_eq!(result.stats.filtered_by_negative, 1);
    }

    #[tokio::test]
    async fn test_curate_uses_bandit_for_exploration() {
        let svc = service(3);
        // Teach the bandit that the first axis pays off
        for _ in 0..5 {
            svc.bandit()
                .update("u1", &[1.0, 0.0, 0.0], 1.0)
                .await
                .unwrap();
        }

        let pool = vec![
            CandidateItem::new("cold", vec![0.0, 1.0, 0.0]),
            CandidateItem::new("warm", vec![1.0, 0.0, 0.0]),
        ];
        let result = svc
            .curate(
                &UserProfile::new("u1", vec![0.0, 0.0, 0.0]),
                &pool,
                &InteractionHistory::default(),
                2,
                None,
            )
            .await
            .unwrap();

        let warm = result.items.iter().find(|i| i.item.id == "warm").unwrap();
        let cold = result.items.iter().find(|i| i.item.id == "cold").unwrap();
        assert!(warm.scores.ucb > cold.scores.ucb);
        assert_eq!(result.items.len(), 2);
    }

    #[tokio::test]
    async fn test_curate_empty_pool() {
        let svc = service(3);
        let result = svc
            .curate(
                &UserProfile::new("u1", vec![1.0, 0.0, 0.0]),
                &[],
                &InteractionHistory::default(),
                3,
                None,
            )
            .await
            .unwrap();
        assert!(result.items.is_empty());
        assert_eq!(result.match_score, 0.0);
    }
}
