// ============================================
// Reward Decay (隱式負反饋)
// ============================================
//
// Delivered items either get clicked or silently expire. Once an impression
// is older than the TTL:
// - clicked   → already rewarded through feedback, just dropped
// - unclicked → BanditService::update(embedding, 0.0), then dropped
//
// Every processed impression is deleted whatever the outcome, so a second
// run over the same window finds nothing and returns zero counts. Runs for
// one subject are serialized (sweep job vs. on-demand decay) so the same
// impression is never applied twice.

use crate::db::{ClickLog, ImpressionStore, StoreError};
use crate::metrics::DecayMetrics;
use crate::models::{ClickEvent, DecayOutcome, PendingImpression};
use crate::services::bandit::{BanditError, BanditService, UpdateOutcome};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum DecayError {
    #[error("TTL must not be negative: {0}ms")]
    NegativeTtl(i64),

    #[error("Bandit error: {0}")]
    Bandit(#[from] BanditError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, DecayError>;

pub struct RewardDecayProcess {
    bandit: Arc<BanditService>,
    impressions: Arc<dyn ImpressionStore>,
    clicks: Arc<dyn ClickLog>,
    running: DashMap<String, Arc<Mutex<()>>>,
}

impl RewardDecayProcess {
    pub fn new(
        bandit: Arc<BanditService>,
        impressions: Arc<dyn ImpressionStore>,
        clicks: Arc<dyn ClickLog>,
    ) -> Self {
        Self {
            bandit,
            impressions,
            clicks,
            running: DashMap::new(),
        }
    }

    pub fn impressions(&self) -> &Arc<dyn ImpressionStore> {
        &self.impressions
    }

    pub async fn decay(&self, subject_id: &str, ttl: Duration) -> Result<DecayOutcome> {
        self.decay_at(subject_id, ttl, Utc::now()).await
    }

    /// Decay relative to an explicit clock
    pub async fn decay_at(
        &self,
        subject_id: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<DecayOutcome> {
        if ttl < Duration::zero() {
            return Err(DecayError::NegativeTtl(ttl.num_milliseconds()));
        }

        let lock = self
            .running
            .entry(subject_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let result = {
            let _guard = lock.lock().await;
            self.decay_locked(subject_id, ttl, now).await
        };
        drop(lock);
        self.running
            .remove_if(subject_id, |_, lock| Arc::strong_count(lock) == 1);

        result
    }

    async fn decay_locked(
        &self,
        subject_id: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<DecayOutcome> {
        // A TTL reaching past the start of time expires nothing
        let cutoff = now
            .checked_sub_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let expired = self.impressions.list_older_than(subject_id, cutoff).await?;
        if expired.is_empty() {
            debug!(subject = subject_id, "No expired impressions");
            return Ok(DecayOutcome::default());
        }

        // list_older_than is oldest first
        let since = expired[0].sent_at;
        let clicks = self.clicks.clicks_since(subject_id, since).await?;

        let (clicked, unclicked): (Vec<PendingImpression>, Vec<PendingImpression>) = expired
            .into_iter()
            .partition(|imp| was_clicked(imp, &clicks));

        let mut outcome = DecayOutcome {
            clicked_count: clicked.len(),
            ..Default::default()
        };

        if !clicked.is_empty() {
            self.impressions.delete(subject_id, &clicked).await?;
        }

        for (processed, impression) in unclicked.iter().enumerate() {
            match self.bandit.update(subject_id, &impression.embedding, 0.0).await {
                Ok(UpdateOutcome::Applied) => outcome.decayed_count += 1,
                Ok(other) => {
                    warn!(
                        subject = subject_id,
                        item = %impression.item_id,
                        outcome = other.as_str(),
                        "Decayed impression not applied to bandit"
                    );
                    outcome.skipped_count += 1;
                }
                Err(e) => {
                    // Keep the unprocessed tail for the next sweep
                    if processed > 0 {
                        self.impressions
                            .delete(subject_id, &unclicked[..processed])
                            .await?;
                    }
                    return Err(e.into());
                }
            }
        }

        if !unclicked.is_empty() {
            self.impressions.delete(subject_id, &unclicked).await?;
        }

        info!(
            subject = subject_id,
            decayed = outcome.decayed_count,
            clicked = outcome.clicked_count,
            skipped = outcome.skipped_count,
            "Reward decay complete"
        );
        DecayMetrics::record(&outcome);

        Ok(outcome)
    }
}

fn was_clicked(impression: &PendingImpression, clicks: &[ClickEvent]) -> bool {
    clicks
        .iter()
        .any(|c| c.item_id == impression.item_id && c.clicked_at >= impression.sent_at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BanditConfig;
    use crate::db::{
        InMemoryBanditStore, InMemoryClickLog, InMemoryImpressionStore, MockBanditStateStore,
    };

    struct Fixture {
        decay: RewardDecayProcess,
        bandit: Arc<BanditService>,
        impressions: Arc<InMemoryImpressionStore>,
        clicks: Arc<InMemoryClickLog>,
    }

    fn fixture() -> Fixture {
        let bandit = Arc::new(BanditService::new(
            Arc::new(InMemoryBanditStore::new()),
            BanditConfig {
                dimension: 3,
                alpha: 0.1,
                ctr_alpha_boost: 0.5,
            },
        ));
        let impressions = Arc::new(InMemoryImpressionStore::new());
        let clicks = Arc::new(InMemoryClickLog::new());
        Fixture {
            decay: RewardDecayProcess::new(bandit.clone(), impressions.clone(), clicks.clone()),
            bandit,
            impressions,
            clicks,
        }
    }

    fn impression(item: &str, embedding: Vec<f64>, sent_at: DateTime<Utc>) -> PendingImpression {
        PendingImpression {
            subject_id: "u1".to_string(),
            item_id: item.to_string(),
            embedding,
            sent_at,
        }
    }

    #[tokio::test]
    async fn test_unclicked_decays_clicked_is_dropped() {
        let f = fixture();
        let now = Utc::now();
        let sent = now - Duration::hours(30);

        f.impressions
            .append(&impression("ignored", vec![1.0, 0.0, 0.0], sent))
            .await
            .unwrap();
        f.impressions
            .append(&impression("clicked", vec![0.0, 1.0, 0.0], sent))
            .await
            .unwrap();
        f.impressions
            .append(&impression("fresh", vec![0.0, 0.0, 1.0], now - Duration::hours(1)))
            .await
            .unwrap();
        f.clicks
            .record_click(&ClickEvent {
                subject_id: "u1".to_string(),
                item_id: "clicked".to_string(),
                clicked_at: sent + Duration::minutes(5),
            })
            .await
            .unwrap();

        let outcome = f.decay.decay_at("u1", Duration::hours(24), now).await.unwrap();
        assert_eq!(outcome.decayed_count, 1);
        assert_eq!(outcome.clicked_count, 1);
        assert_eq!(f.impressions.pending_count("u1"), 1);

        let state = f.bandit.state("u1").await.unwrap();
        assert_eq!(state.a[0], 2.0); // x = e0 added once
        assert_eq!(state.a[4], 1.0); // clicked item untouched
        assert!(state.b.iter().all(|v| *v == 0.0));
    }

    #[tokio::test]
    async fn test_rerun_is_noop() {
        let f = fixture();
        let now = Utc::now();
        f.impressions
            .append(&impression("a", vec![1.0, 0.0, 0.0], now - Duration::days(2)))
            .await
            .unwrap();

        let first = f.decay.decay_at("u1", Duration::hours(24), now).await.unwrap();
        assert_eq!(first.decayed_count, 1);

        let second = f.decay.decay_at("u1", Duration::hours(24), now).await.unwrap();
        assert_eq!(second, DecayOutcome::default());
        assert_eq!(f.bandit.state("u1").await.unwrap().a[0], 2.0);
    }

    #[tokio::test]
    async fn test_click_before_delivery_does_not_count() {
        let f = fixture();
        let now = Utc::now();
        let sent = now - Duration::days(2);
        f.clicks
            .record_click(&ClickEvent {
                subject_id: "u1".to_string(),
                item_id: "a".to_string(),
                clicked_at: sent - Duration::hours(1),
            })
            .await
            .unwrap();
        f.impressions
            .append(&impression("a", vec![1.0, 0.0, 0.0], sent))
            .await
            .unwrap();

        let outcome = f.decay.decay_at("u1", Duration::hours(24), now).await.unwrap();
        assert_eq!(outcome.decayed_count, 1);
        assert_eq!(outcome.clicked_count, 0);
    }

    #[tokio::test]
    async fn test_mismatched_embedding_is_skipped_and_deleted() {
        let f = fixture();
        let now = Utc::now();
        f.impressions
            .append(&impression("bad", vec![1.0, 0.0], now - Duration::days(2)))
            .await
            .unwrap();

        let outcome = f.decay.decay_at("u1", Duration::hours(24), now).await.unwrap();
        assert_eq!(outcome.skipped_count, 1);
        assert_eq!(outcome.decayed_count, 0);
        assert_eq!(f.impressions.pending_count("u1"), 0);
    }

    #[tokio::test]
    async fn test_store_failure_keeps_unprocessed_impressions() {
        let mut store = MockBanditStateStore::new();
        store.expect_get().returning(|_| Ok(None));
        let mut puts = 0;
        store.expect_put().returning(move |_, _| {
            puts += 1;
            if puts == 1 {
                Ok(())
            } else {
                Err(StoreError::Redis("connection reset".into()))
            }
        });

        let bandit = Arc::new(BanditService::new(
            Arc::new(store),
            BanditConfig {
                dimension: 3,
                ..Default::default()
            },
        ));
        let impressions = Arc::new(InMemoryImpressionStore::new());
        let decay = RewardDecayProcess::new(
            bandit,
            impressions.clone(),
            Arc::new(InMemoryClickLog::new()),
        );

        let now = Utc::now();
        for (i, item) in ["first", "second", "third"].iter().enumerate() {
            impressions
                .append(&impression(
                    item,
                    vec![1.0, 0.0, 0.0],
                    now - Duration::days(3) + Duration::minutes(i as i64),
                ))
                .await
                .unwrap();
        }

        let result = decay.decay_at("u1", Duration::hours(24), now).await;
        assert!(matches!(
            result,
            Err(DecayError::Bandit(BanditError::Store(_)))
        ));
        // "first" was applied and removed; the rest wait for the next sweep
        assert_eq!(impressions.pending_count("u1"), 2);
    }

    #[tokio::test]
    async fn test_huge_ttl_expires_nothing() {
        let f = fixture();
        f.impressions
            .append(&impression("a", vec![1.0, 0.0, 0.0], Utc::now()))
            .await
            .unwrap();

        let outcome = f
            .decay
            .decay("u1", Duration::milliseconds(i64::MAX))
            .await
            .unwrap();
        assert_eq!(outcome, DecayOutcome::default());
        assert_eq!(f.impressions.pending_count("u1"), 1);
    }

    /// Lists like a network store: yields between reading and returning
    struct YieldingImpressions(Arc<InMemoryImpressionStore>);

    #[async_trait::async_trait]
    impl ImpressionStore for YieldingImpressions {
        async fn append(&self, impression: &PendingImpression) -> crate::db::Result<()> {
            self.0.append(impression).await
        }

        async fn list_older_than(
            &self,
            subject_id: &str,
            cutoff: DateTime<Utc>,
        ) -> crate::db::Result<Vec<PendingImpression>> {
            let listed = self.0.list_older_than(subject_id, cutoff).await;
            tokio::task::yield_now().await;
            listed
        }

        async fn delete(
            &self,
            subject_id: &str,
            impressions: &[PendingImpression],
        ) -> crate::db::Result<usize> {
            self.0.delete(subject_id, impressions).await
        }

        async fn subjects(&self) -> crate::db::Result<Vec<String>> {
            self.0.subjects().await
        }
    }

    #[tokio::test]
    async fn test_overlapping_runs_apply_each_impression_once() {
        let bandit = Arc::new(BanditService::new(
            Arc::new(InMemoryBanditStore::new()),
            BanditConfig {
                dimension: 3,
                ..Default::default()
            },
        ));
        let inner = Arc::new(InMemoryImpressionStore::new());
        let decay = RewardDecayProcess::new(
            bandit.clone(),
            Arc::new(YieldingImpressions(inner.clone())),
            Arc::new(InMemoryClickLog::new()),
        );

        let now = Utc::now();
        inner
            .append(&impression("a", vec![1.0, 0.0, 0.0], now - Duration::days(2)))
            .await
            .unwrap();

        let ttl = Duration::hours(24);
        let (first, second) = tokio::join!(
            decay.decay_at("u1", ttl, now),
            decay.decay_at("u1", ttl, now)
        );
        let total = first.unwrap().decayed_count + second.unwrap().decayed_count;
        assert_eq!(total, 1);
        assert_eq!(bandit.state("u1").await.unwrap().a[0], 2.0);
        assert_eq!(inner.pending_count("u1"), 0);
    }

    #[tokio::test]
    async fn test_negative_ttl_rejected() {
        let f = fixture();
        let result = f.decay.decay("u1", Duration::milliseconds(-1)).await;
        assert!(matches!(result, Err(DecayError::NegativeTtl(-1))));
    }
}
