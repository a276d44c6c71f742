//! Prometheus metrics for curation-service
use crate::models::DecayOutcome;
use once_cell::sync::Lazy;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, Encoder, Histogram,
    IntCounter, IntCounterVec, TextEncoder,
};

static BANDIT_UPDATES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "curation_bandit_updates_total",
        "Bandit update attempts by outcome",
        &["outcome"]
    )
    .expect("Failed to register bandit updates metric")
});

static BANDIT_SCORE_BATCHES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "curation_bandit_score_batches_total",
        "Bandit score batches by outcome (ok, degraded)",
        &["outcome"]
    )
    .expect("Failed to register bandit score batches metric")
});

static SELECTION_PICKS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "curation_selection_picks_total",
        "Selected items by source bucket",
        &["bucket"]
    )
    .expect("Failed to register selection picks metric")
});

static SELECTION_FILTERED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "curation_selection_negative_filtered_total",
        "Candidates dropped for similarity to negative feedback"
    )
    .expect("Failed to register selection filtered metric")
});

static SELECTION_DURATION: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "curation_selection_duration_seconds",
        "Time spent scoring and selecting one pool"
    )
    .expect("Failed to register selection duration metric")
});

static DECAYED_IMPRESSIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "curation_decay_impressions_total",
        "Expired impressions processed by the decay sweep",
        &["result"]
    )
    .expect("Failed to register decay impressions metric")
});

pub struct BanditMetrics;

impl BanditMetrics {
    pub fn record_update(outcome: &str) {
        BANDIT_UPDATES.with_label_values(&[outcome]).inc();
    }

    pub fn record_score(outcome: &str) {
        BANDIT_SCORE_BATCHES.with_label_values(&[outcome]).inc();
    }
}

pub struct SelectionMetrics;

impl SelectionMetrics {
    pub fn record_pick(bucket: &str) {
        SELECTION_PICKS.with_label_values(&[bucket]).inc();
    }

    pub fn record_filtered(count: usize) {
        SELECTION_FILTERED.inc_by(count as u64);
    }

    pub fn record_duration(duration_secs: f64) {
        SELECTION_DURATION.observe(duration_secs);
    }
}

pub struct DecayMetrics;

impl DecayMetrics {
    pub fn record(outcome: &DecayOutcome) {
        DECAYED_IMPRESSIONS
            .with_label_values(&["decayed"])
            .inc_by(outcome.decayed_count as u64);
        DECAYED_IMPRESSIONS
            .with_label_values(&["clicked"])
            .inc_by(outcome.clicked_count as u64);
        DECAYED_IMPRESSIONS
            .with_label_values(&["skipped"])
            .inc_by(outcome.skipped_count as u64);
    }
}

/// Render the default registry in Prometheus text format
pub fn render() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if encoder.encode(&prometheus::gather(), &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
