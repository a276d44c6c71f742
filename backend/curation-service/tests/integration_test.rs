use chrono::{Duration, Utc};
use curation_service::config::{BanditConfig, ScoringWeights, SelectionConfig};
use curation_service::db::{
    ClickLog, ImpressionStore, InMemoryBanditStore, InMemoryClickLog, InMemoryImpressionStore,
};
use curation_service::models::{
    Bucket, CandidateItem, ClickEvent, InteractionHistory, PendingImpression, UserProfile,
};
use curation_service::services::scoring::negative_penalty;
use curation_service::{BanditService, CurationService, RewardDecayProcess};
use std::collections::HashSet;
use std::sync::Arc;

fn curation(dimension: usize) -> (CurationService, Arc<BanditService>) {
    let bandit = Arc::new(BanditService::new(
        Arc::new(InMemoryBanditStore::new()),
        BanditConfig {
            dimension,
            ..Default::default()
        },
    ));
    let svc = CurationService::new(
        bandit.clone(),
        ScoringWeights::default(),
        SelectionConfig::default(),
    );
    (svc, bandit)
}

/// Deterministic pseudo-random embeddings (LCG)
fn embeddings(count: usize, dimension: usize, seed: u64) -> Vec<Vec<f64>> {
    let mut state = seed;
    (0..count)
        .map(|_| {
            (0..dimension)
                .map(|_| {
                    state = state
                        .wrapping_mul(6364136223846793005)
                        .wrapping_add(1442695040888963407);
                    ((state >> 33) as f64 / (1u64 << 31) as f64) * 2.0 - 1.0
                })
                .collect()
        })
        .collect()
}

#[test]
fn test_long_bucket_order_end_to_end() {
    let (svc, _) = curation(4);

    let a = CandidateItem::new("a", vec![0.95, 0.312, 0.0, 0.0]);
    let b = CandidateItem::new("b", vec![0.7, -0.714, 0.0, 0.0]);
    let c = CandidateItem::new("c", vec![0.4, 0.0, 0.9165, 0.0]);
    let d = CandidateItem::new("d", vec![0.1, 0.5, -0.86, 0.0]);
    let e = CandidateItem::new("e", vec![-0.5, 0.866, 0.0, 0.0]);
    let pool = vec![d, b, e, a, c];

    let result = svc.select(
        &pool,
        &[1.0, 0.0, 0.0, 0.0],
        &InteractionHistory::default(),
        5,
    );

    let long: Vec<&str> = result
        .items
        .iter()
        .filter(|i| i.bucket == Bucket::Long)
        .map(|i| i.item.id.as_str())
        .collect();
    assert_eq!(long, vec!["a", "b"]);
    assert_eq!(result.ids(), vec!["a", "d", "b", "e", "c"]);
    assert_eq!(result.stats.fallback_picks, 0);
    assert!((result.match_score - 0.33).abs() < 1e-2);
}

#[test]
fn test_selection_bounds_and_uniqueness() {
    let (svc, _) = curation(8);
    let pool: Vec<CandidateItem> = embeddings(40, 8, 7)
        .into_iter()
        .enumerate()
        .map(|(i, e)| CandidateItem::new(format!("item-{i}"), e))
        .collect();
    let profile = embeddings(1, 8, 99).remove(0);
    let history = InteractionHistory {
        recent_positive: embeddings(3, 8, 11),
        recent_negative: vec![],
    };

    for count in [0, 1, 5, 17, 40, 100] {
        let result = svc.select(&pool, &profile, &history, count);
        assert!(result.items.len() <= count);
        assert_eq!(result.items.len(), count.min(pool.len()));

        let ids: HashSet<&str> = result.ids().into_iter().collect();
        assert_eq!(ids.len(), result.items.len());
    }
}

#[test]
fn test_negative_feedback_excluded() {
    let (svc, _) = curation(6);
    let pool: Vec<CandidateItem> = embeddings(30, 6, 3)
        .into_iter()
        .enumerate()
        .map(|(i, e)| CandidateItem::new(format!("item-{i}"), e))
        .collect();
    // 用池中的兩個向量當作負反饋
    let negatives = vec![pool[0].embedding.clone(), pool[1].embedding.clone()];
    let history = InteractionHistory {
        recent_positive: vec![],
        recent_negative: negatives.clone(),
    };

    let result = svc.select(&pool, &embeddings(1, 6, 5).remove(0), &history, 30);
    assert!(result.stats.filtered_by_negative >= 2);
    for item in &result.items {
        assert!(negative_penalty(&item.item.embedding, &negatives) < 0.75);
        assert_ne!(item.item.id, "item-0");
        assert_ne!(item.item.id, "item-1");
    }
}

#[test]
fn test_near_duplicate_pair() {
    let (svc, _) = curation(3);
    let pool = vec![
        CandidateItem::new("x", vec![1.0, 0.0, 0.0]),
        CandidateItem::new("x-dup", vec![0.99, 0.05, 0.0]),
        CandidateItem::new("y", vec![0.0, 1.0, 0.0]),
    ];

    let result = svc.select(&pool, &[1.0, 0.2, 0.0], &InteractionHistory::default(), 2);
    let ids = result.ids();
    assert_eq!(ids.len(), 2);
    assert!(!(ids.contains(&"x") && ids.contains(&"x-dup")));
}

#[test]
fn test_empty_pool() {
    let (svc, _) = curation(3);
    let result = svc.select(&[], &[1.0, 0.0, 0.0], &InteractionHistory::default(), 10);
    assert!(result.items.is_empty());
    assert_eq!(result.match_score, 0.0);
}

#[tokio::test]
async fn test_score_is_repeatable_and_trace_grows() {
    let (_, bandit) = curation(5);
    let pool: Vec<CandidateItem> = embeddings(6, 5, 21)
        .into_iter()
        .enumerate()
        .map(|(i, e)| CandidateItem::new(format!("item-{i}"), e))
        .collect();

    for (i, x) in embeddings(4, 5, 8).iter().enumerate() {
        bandit.update("u1", x, (i % 2) as f64).await.unwrap();
    }

    let first = bandit.score("u1", &pool, None).await.unwrap();
    let second = bandit.score("u1", &pool, None).await.unwrap();
    assert_eq!(first.scores, second.scores);

    let mut trace = bandit.state("u1").await.unwrap().trace().unwrap();
    for x in embeddings(5, 5, 77) {
        bandit.update("u1", &x, 0.0).await.unwrap();
        let next = bandit.state("u1").await.unwrap().trace().unwrap();
        let norm_sq: f64 = x.iter().map(|v| v * v).sum();
        assert!(next >= trace);
        assert!((next - trace - norm_sq).abs() < 1e-9);
        trace = next;
    }
}

#[tokio::test]
async fn test_feedback_loop_with_decay() {
    // 創建 in-memory stores
    let (svc, bandit) = curation(4);
    let impressions = Arc::new(InMemoryImpressionStore::new());
    let clicks = Arc::new(InMemoryClickLog::new());
    let decay = RewardDecayProcess::new(bandit.clone(), impressions.clone(), clicks.clone());

    let pool = vec![
        CandidateItem::new("a", vec![1.0, 0.0, 0.0, 0.0]),
        CandidateItem::new("b", vec![0.0, 1.0, 0.0, 0.0]),
        CandidateItem::new("c", vec![0.0, 0.0, 1.0, 0.0]),
    ];
    let result = svc
        .curate(
            &UserProfile::new("u1", vec![1.0, 0.0, 0.0, 0.0]),
            &pool,
            &InteractionHistory::default(),
            3,
            None,
        )
        .await
        .unwrap();
    assert_eq!(result.items.len(), 3);

    let sent_at = Utc::now() - Duration::hours(30);
    for item in &result.items {
        impressions
            .append(&PendingImpression {
                subject_id: "u1".into(),
                item_id: item.item.id.clone(),
                embedding: item.item.embedding.clone(),
                sent_at,
            })
            .await
            .unwrap();
    }

    clicks
        .record_click(&ClickEvent {
            subject_id: "u1".into(),
            item_id: "a".into(),
            clicked_at: sent_at + Duration::minutes(2),
        })
        .await
        .unwrap();
    bandit.update("u1", &[1.0, 0.0, 0.0, 0.0], 1.0).await.unwrap();

    let outcome = decay.decay("u1", Duration::hours(24)).await.unwrap();
    assert_eq!(outcome.clicked_count, 1);
    assert_eq!(outcome.decayed_count, 2);
    assert!(impressions.subjects().await.unwrap().is_empty());

    let state = bandit.state("u1").await.unwrap();
    assert_eq!(state.b, vec![1.0, 0.0, 0.0, 0.0]);
    assert_eq!(state.trace().unwrap(), 4.0 + 3.0);

    let again = decay.decay("u1", Duration::hours(24)).await.unwrap();
    assert_eq!(again.processed(), 0);

    // The clicked direction now outranks an untouched one
    let scores = bandit.score("u1", &pool, None).await.unwrap().scores;
    assert!(scores[0].ucb > scores[1].ucb);
}
