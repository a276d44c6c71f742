use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fixed-length embedding. The last coordinate is the recency slot
/// (normalized age in [0, 1], 0 = newest); the rest is semantic content.
pub type Embedding = Vec<f64>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CandidateItem {
    pub id: String,
    pub embedding: Embedding,
    /// Age supplied by the caller; written into the recency slot before scoring
    #[serde(default)]
    pub normalized_age: Option<f64>,
    /// Used to derive `normalized_age` when the caller did not supply one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
}

impl CandidateItem {
    pub fn new(id: impl Into<String>, embedding: Embedding) -> Self {
        Self {
            id: id.into(),
            embedding,
            normalized_age: None,
            published_at: None,
        }
    }

    pub fn with_published_at(mut self, published_at: DateTime<Utc>) -> Self {
        self.published_at = Some(published_at);
        self
    }

    /// Derive `normalized_age` from `published_at` unless already set
    pub fn resolve_age(&mut self, now: DateTime<Utc>) {
        if self.normalized_age.is_none() {
            if let Some(published_at) = self.published_at {
                self.normalized_age = Some(crate::utils::normalized_age(published_at, now));
            }
        }
    }

    pub fn with_normalized_age(mut self, age: f64) -> Self {
        self.normalized_age = Some(age);
        self
    }

    /// Current value of the recency slot, if the embedding has one
    pub fn recency(&self) -> Option<f64> {
        self.embedding.last().copied()
    }

    /// Copy `normalized_age` (clamped to [0, 1]) into the recency slot
    pub fn refresh_recency(&mut self) {
        if let (Some(age), Some(slot)) = (self.normalized_age, self.embedding.last_mut()) {
            *slot = if age.is_finite() {
                age.clamp(0.0, 1.0)
            } else {
                1.0
            };
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub subject_id: String,
    pub embedding: Embedding,
}

impl UserProfile {
    /// Build a profile; the recency slot is forced to 0
    pub fn new(subject_id: impl Into<String>, mut embedding: Embedding) -> Self {
        if let Some(slot) = embedding.last_mut() {
            *slot = 0.0;
        }
        Self {
            subject_id: subject_id.into(),
            embedding,
        }
    }
}

/// Recent feedback for a subject. Owned by the interaction log; read-only here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InteractionHistory {
    /// Positive feedback, index 0 = most recent
    #[serde(default)]
    pub recent_positive: Vec<Embedding>,
    #[serde(default)]
    pub recent_negative: Vec<Embedding>,
}

/// An item delivered to a subject whose outcome has not been observed yet
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingImpression {
    pub subject_id: String,
    pub item_id: String,
    pub embedding: Embedding,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClickEvent {
    pub subject_id: String,
    pub item_id: String,
    pub clicked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    Long,  // long-term interest (profile similarity)
    Short, // short-term interest (recent positives)
    Explore,
    Fallback, // diversity relaxed to guarantee progress
}

impl Bucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::Long => "long",
            Bucket::Short => "short",
            Bucket::Explore => "explore",
            Bucket::Fallback => "fallback",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct ComponentScores {
    pub long_term_relevance: f64,
    pub short_term_relevance: f64,
    pub exploration_score: f64,
    pub freshness_score: f64,
    pub negative_penalty: f64,
    pub ucb: f64,
}

#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub item: CandidateItem,
    pub scores: ComponentScores,
}

#[derive(Debug, Clone, Serialize)]
pub struct SelectedItem {
    pub item: CandidateItem,
    pub bucket: Bucket,
    pub scores: ComponentScores,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct SelectionStats {
    pub long_picks: usize,
    pub short_picks: usize,
    pub explore_picks: usize,
    pub fallback_picks: usize,
    pub skipped_turns: usize,
    pub filtered_by_negative: usize,
}

impl SelectionStats {
    pub fn record_pick(&mut self, bucket: Bucket) {
        match bucket {
            Bucket::Long => self.long_picks += 1,
            Bucket::Short => self.short_picks += 1,
            Bucket::Explore => self.explore_picks += 1,
            Bucket::Fallback => self.fallback_picks += 1,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SelectionResult {
    pub items: Vec<SelectedItem>,
    /// Mean long-term relevance of the selection (0 when empty)
    pub match_score: f64,
    pub stats: SelectionStats,
}

impl SelectionResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.items.iter().map(|i| i.item.id.as_str()).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UcbScore {
    pub id: String,
    pub ucb: f64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DecayOutcome {
    /// Unclicked impressions applied to the bandit as reward 0
    pub decayed_count: usize,
    pub clicked_count: usize,
    /// Unclicked impressions the bandit ignored (dimension mismatch, non-finite)
    pub skipped_count: usize,
}

impl DecayOutcome {
    pub fn processed(&self) -> usize {
        self.decayed_count + self.clicked_count + self.skipped_count
    }
}
