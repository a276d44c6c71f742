use crate::config::SelectionConfig;
use crate::models::{Bucket, ComponentScores, ScoredCandidate, SelectedItem, SelectionResult, SelectionStats};
use crate::services::vector_math;
use tracing::debug;

/// Which view supplies each pick: 2 long : 2 short : 1 explore
const TURN_PATTERN: [Bucket; 5] = [
    Bucket::Long,
    Bucket::Short,
    Bucket::Long,
    Bucket::Short,
    Bucket::Explore,
];

/// One descending view over the pool with its own cursor
struct RankedView {
    order: Vec<usize>,
    cursor: usize,
}

/// NaN ranks last; -0.0 ties with 0.0
fn rank_key(score: f64) -> f64 {
    if score.is_nan() {
        f64::NEG_INFINITY
    } else {
        score + 0.0
    }
}

impl RankedView {
    fn new(candidates: &[ScoredCandidate], key: fn(&ComponentScores) -> f64) -> Self {
        let mut order: Vec<usize> = (0..candidates.len()).collect();
        // Stable: ties keep pool order
        order.sort_by(|&a, &b| {
            rank_key(key(&candidates[b].scores)).total_cmp(&rank_key(key(&candidates[a].scores)))
        });
        Self { order, cursor: 0 }
    }

    fn is_exhausted(&self) -> bool {
        self.cursor >= self.order.len()
    }

    /// Advance past used and too-similar candidates; returns the first usable one
    fn next_usable(
        &mut self,
        candidates: &[ScoredCandidate],
        used: &[bool],
        selected: &[&[f64]],
        threshold: f64,
    ) -> Option<usize> {
        while self.cursor < self.order.len() {
            let idx = self.order[self.cursor];
            self.cursor += 1;

            if used[idx] {
                continue;
            }
            if too_similar(&candidates[idx].item.embedding, selected, threshold) {
                continue;
            }
            return Some(idx);
        }
        None
    }
}

fn too_similar(embedding: &[f64], selected: &[&[f64]], threshold: f64) -> bool {
    vector_math::one_to_many(embedding, selected)
        .into_iter()
        .any(|sim| sim > threshold)
}

/// Iterative bucketed diverse selection.
///
/// Three views (long-term, short-term, exploration) take turns supplying
/// picks. A pick must not exceed the similarity threshold against anything
/// already selected. When every view is exhausted but slots and candidates
/// remain, the diversity rule is relaxed and the best remaining candidate by
/// long-term relevance is taken, so near-duplicate leftovers cannot stall the
/// loop.
pub struct SelectionEngine {
    config: SelectionConfig,
}

impl SelectionEngine {
    pub fn new(config: SelectionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SelectionConfig {
        &self.config
    }

    pub fn select(&self, candidates: &[ScoredCandidate], count: usize) -> SelectionResult {
        if candidates.is_empty() || count == 0 {
            return SelectionResult::empty();
        }

        let target = count.min(candidates.len());
        let threshold = self.config.similarity_threshold;

        // Index order matches Bucket::Long, Short, Explore
        let mut views = [
            RankedView::new(candidates, |s| s.long_term_relevance),
            RankedView::new(candidates, |s| s.short_term_relevance),
            RankedView::new(candidates, |s| s.exploration_score),
        ];

        let mut used = vec![false; candidates.len()];
        let mut picks: Vec<(usize, Bucket)> = Vec::with_capacity(target);
        let mut selected_embeddings: Vec<&[f64]> = Vec::with_capacity(target);
        let mut stats = SelectionStats::default();
        let mut turn = 0usize;

        while picks.len() < target {
            if views.iter().all(RankedView::is_exhausted) {
                let fallback = views[0].order.iter().copied().find(|&idx| !used[idx]);
                match fallback {
                    Some(idx) => {
                        used[idx] = true;
                        selected_embeddings.push(&candidates[idx].item.embedding);
                        picks.push((idx, Bucket::Fallback));
                        stats.record_pick(Bucket::Fallback);
                        continue;
                    }
                    None => break,
                }
            }

            let bucket = TURN_PATTERN[turn % TURN_PATTERN.len()];
            turn += 1;

            let view = match bucket {
                Bucket::Long => &mut views[0],
                Bucket::Short => &mut views[1],
                _ => &mut views[2],
            };

            match view.next_usable(candidates, &used, &selected_embeddings, threshold) {
                Some(idx) => {
                    used[idx] = true;
                    selected_embeddings.push(&candidates[idx].item.embedding);
                    picks.push((idx, bucket));
                    stats.record_pick(bucket);
                }
                None => stats.skipped_turns += 1,
            }
        }

        let items: Vec<SelectedItem> = picks
            .into_iter()
            .map(|(idx, bucket)| SelectedItem {
                item: candidates[idx].item.clone(),
                bucket,
                scores: candidates[idx].scores,
            })
            .collect();

        let match_score = if items.is_empty() {
            0.0
        } else {
            items
                .iter()
                .map(|i| i.scores.long_term_relevance)
                .sum::<f64>()
                / items.len() as f64
        };

        debug!(
            pool = candidates.len(),
            requested = count,
            selected = items.len(),
            skipped_turns = stats.skipped_turns,
            fallback_picks = stats.fallback_picks,
            match_score = match_score,
            "Selection complete"
        );

        SelectionResult {
            items,
            match_score,
            stats,
        }
    }
}
