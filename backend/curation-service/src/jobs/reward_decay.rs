// ============================================
// Reward Decay Job (曝光衰減任務)
// ============================================
//
// Periodic sweep over every subject with pending impressions.
// Designed to run inside the server process or as a standalone CronJob.
//
// Workflow:
// 1. List subjects from the impression store
// 2. Run RewardDecayProcess::decay for each with the configured TTL
// 3. Log and count per-subject failures; keep going
//
// Usage:
//   curation-service --mode decay        (single sweep, then exit)

use crate::config::DecayConfig;
use crate::db::StoreError;
use crate::services::decay::RewardDecayProcess;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{error, info};

/// Decay sweep statistics
#[derive(Debug, Clone, Default)]
pub struct DecaySweepStats {
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub subjects_processed: u32,
    pub subjects_failed: u32,
    pub impressions_decayed: usize,
    pub impressions_clicked: usize,
    pub impressions_skipped: usize,
    pub total_duration_ms: u64,
}

/// Decay sweep runner
pub struct RewardDecayJob {
    config: DecayConfig,
    process: Arc<RewardDecayProcess>,
}

impl RewardDecayJob {
    pub fn new(config: DecayConfig, process: Arc<RewardDecayProcess>) -> Self {
        Self { config, process }
    }

    /// Sweep until cancelled, or once when `run_once` is set
    pub async fn run(&self) -> Result<DecaySweepStats, StoreError> {
        loop {
            let stats = self.run_single_pass().await?;

            info!(
                processed = stats.subjects_processed,
                failed = stats.subjects_failed,
                decayed = stats.impressions_decayed,
                clicked = stats.impressions_clicked,
                duration_ms = stats.total_duration_ms,
                "Reward decay pass completed"
            );

            if self.config.run_once {
                return Ok(stats);
            }

            sleep(Duration::from_secs(self.config.interval_secs)).await;
        }
    }

    /// One sweep over every subject with pending impressions.
    /// Only listing subjects can fail the pass.
    pub async fn run_single_pass(&self) -> Result<DecaySweepStats, StoreError> {
        let start_time = Instant::now();
        let mut stats = DecaySweepStats {
            started_at: Some(Utc::now()),
            ..Default::default()
        };

        let ttl = self.config.ttl();
        let subjects = self.process.impressions().subjects().await?;

        info!(
            subject_count = subjects.len(),
            ttl_secs = self.config.ttl_secs,
            "Starting reward decay pass"
        );

        for subject in &subjects {
            stats.subjects_processed += 1;

            match self.process.decay(subject, ttl).await {
                Ok(outcome) => {
                    stats.impressions_decayed += outcome.decayed_count;
                    stats.impressions_clicked += outcome.clicked_count;
                    stats.impressions_skipped += outcome.skipped_count;
                }
                Err(e) => {
                    stats.subjects_failed += 1;
                    error!(
                        subject = %subject,
                        error = %e,
                        "Failed to decay impressions"
                    );
                }
            }
        }

        stats.completed_at = Some(Utc::now());
        stats.total_duration_ms = start_time.elapsed().as_millis() as u64;

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BanditConfig;
    use crate::db::{
        ImpressionStore, InMemoryBanditStore, InMemoryClickLog, InMemoryImpressionStore,
    };
    use crate::models::PendingImpression;
    use crate::services::bandit::BanditService;

    #[tokio::test]
    async fn test_sweep_covers_every_subject() {
        let impressions = Arc::new(InMemoryImpressionStore::new());
        let bandit = Arc::new(BanditService::new(
            Arc::new(InMemoryBanditStore::new()),
            BanditConfig {
                dimension: 2,
                ..Default::default()
            },
        ));
        let process = Arc::new(RewardDecayProcess::new(
            bandit,
            impressions.clone(),
            Arc::new(InMemoryClickLog::new()),
        ));

        let old = Utc::now() - chrono::Duration::days(3);
        for subject in ["u1", "u2"] {
            impressions
                .append(&PendingImpression {
                    subject_id: subject.to_string(),
                    item_id: "a".to_string(),
                    embedding: vec![1.0, 0.0],
                    sent_at: old,
                })
                .await
                .unwrap();
        }

        let job = RewardDecayJob::new(
            DecayConfig {
                run_once: true,
                ..Default::default()
            },
            process,
        );
        let stats = job.run().await.unwrap();

        assert_eq!(stats.subjects_processed, 2);
        assert_eq!(stats.subjects_failed, 0);
        assert_eq!(stats.impressions_decayed, 2);
        assert!(impressions.subjects().await.unwrap().is_empty());
    }
}
