use super::{BanditError, BanditModelState, LinUcbEngine, Result, ScoreOutcome, UpdateOutcome};
use crate::config::BanditConfig;
use crate::db::BanditStateStore;
use crate::metrics::BanditMetrics;
use crate::models::CandidateItem;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Subject-scoped bandit.
///
/// Writes for one subject are serialized by a per-subject lock held across
/// the whole load → update → save cycle, so concurrent feedback never loses
/// a rank-1 update. Scores take the read side of the same lock.
///
/// The O(D³) math runs on the blocking pool, never on the async workers.
pub struct BanditService {
    engine: LinUcbEngine,
    store: Arc<dyn BanditStateStore>,
    config: BanditConfig,
    locks: DashMap<String, Arc<RwLock<()>>>,
}

impl BanditService {
    pub fn new(store: Arc<dyn BanditStateStore>, config: BanditConfig) -> Self {
        Self {
            engine: LinUcbEngine::new().with_ctr_alpha_boost(config.ctr_alpha_boost),
            store,
            config,
            locks: DashMap::new(),
        }
    }

    pub fn config(&self) -> &BanditConfig {
        &self.config
    }

    fn subject_lock(&self, subject_id: &str) -> Arc<RwLock<()>> {
        self.locks
            .entry(subject_id.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    /// Drop the registry entry once nobody else holds or waits on it
    fn release_lock(&self, subject_id: &str, lock: Arc<RwLock<()>>) {
        drop(lock);
        self.locks
            .remove_if(subject_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    #[cfg(test)]
    fn tracked_subjects(&self) -> usize {
        self.locks.len()
    }

    async fn load_or_init(&self, subject_id: &str) -> Result<BanditModelState> {
        match self.store.get(subject_id).await? {
            Some(state) => Ok(state),
            None => {
                debug!(
                    subject = subject_id,
                    dimension = self.config.dimension,
                    "Initializing bandit model"
                );
                Ok(BanditModelState::new(self.config.dimension, self.config.alpha))
            }
        }
    }

    /// Current model for a subject (identity model if none stored yet)
    pub async fn state(&self, subject_id: &str) -> Result<BanditModelState> {
        let lock = self.subject_lock(subject_id);
        let result = {
            let _guard = lock.read().await;
            self.load_or_init(subject_id).await
        };
        self.release_lock(subject_id, lock);
        result
    }

    /// UCB for each candidate, in input order.
    ///
    /// A fresh subject is scored against the identity model without being
    /// persisted; the first update creates the stored record.
    pub async fn score(
        &self,
        subject_id: &str,
        candidates: &[CandidateItem],
        user_ctr: Option<f64>,
    ) -> Result<ScoreOutcome> {
        let lock = self.subject_lock(subject_id);
        let result = {
            let _guard = lock.read().await;
            self.score_locked(subject_id, candidates, user_ctr).await
        };
        self.release_lock(subject_id, lock);

        let outcome = result?;
        BanditMetrics::record_score(if outcome.degraded { "degraded" } else { "ok" });
        Ok(outcome)
    }

    async fn score_locked(
        &self,
        subject_id: &str,
        candidates: &[CandidateItem],
        user_ctr: Option<f64>,
    ) -> Result<ScoreOutcome> {
        let state = self.load_or_init(subject_id).await?;
        let engine = self.engine.clone();
        let candidates = candidates.to_vec();

        tokio::task::spawn_blocking(move || engine.score(&state, &candidates, user_ctr))
            .await
            .map_err(|e| BanditError::Task(format!("LinUCB scoring: {e}")))?
    }

    /// Apply one reward observation and persist the new model
    pub async fn update(
        &self,
        subject_id: &str,
        embedding: &[f64],
        reward: f64,
    ) -> Result<UpdateOutcome> {
        let lock = self.subject_lock(subject_id);
        let result = {
            let _guard = lock.write().await;
            self.update_locked(subject_id, embedding, reward).await
        };
        self.release_lock(subject_id, lock);

        let outcome = result?;
        BanditMetrics::record_update(outcome.as_str());
        Ok(outcome)
    }

    async fn update_locked(
        &self,
        subject_id: &str,
        embedding: &[f64],
        reward: f64,
    ) -> Result<UpdateOutcome> {
        let mut state = self.load_or_init(subject_id).await?;
        let engine = self.engine.clone();
        let x = embedding.to_vec();

        let (state, outcome) = tokio::task::spawn_blocking(move || {
            engine
                .update(&mut state, &x, reward)
                .map(|outcome| (state, outcome))
        })
        .await
        .map_err(|e| BanditError::Task(format!("LinUCB update: {e}")))??;

        if outcome == UpdateOutcome::Applied {
            self.store.put(subject_id, &state).await?;
            debug!(subject = subject_id, reward = reward, "Bandit model updated");
        } else {
            info!(
                subject = subject_id,
                outcome = outcome.as_str(),
                "Bandit update ignored"
            );
        }

        Ok(outcome)
    }
}
