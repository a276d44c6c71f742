use super::{BanditStateStore, ClickLog, ImpressionStore, Result, CLICK_RETENTION_SECS};
use crate::models::{ClickEvent, PendingImpression};
use crate::services::bandit::BanditModelState;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

#[derive(Default)]
pub struct InMemoryBanditStore {
    states: DashMap<String, BanditModelState>,
}

impl InMemoryBanditStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[async_trait]
impl BanditStateStore for InMemoryBanditStore {
    async fn get(&self, subject_id: &str) -> Result<Option<BanditModelState>> {
        Ok(self.states.get(subject_id).map(|s| s.value().clone()))
    }

    async fn put(&self, subject_id: &str, state: &BanditModelState) -> Result<()> {
        self.states.insert(subject_id.to_string(), state.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryImpressionStore {
    impressions: DashMap<String, Vec<PendingImpression>>,
}

impl InMemoryImpressionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending_count(&self, subject_id: &str) -> usize {
        self.impressions
            .get(subject_id)
            .map(|list| list.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl ImpressionStore for InMemoryImpressionStore {
    async fn append(&self, impression: &PendingImpression) -> Result<()> {
        self.impressions
            .entry(impression.subject_id.clone())
            .or_default()
            .push(impression.clone());
        Ok(())
    }

    async fn list_older_than(
        &self,
        subject_id: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<PendingImpression>> {
        let mut expired: Vec<PendingImpression> = self
            .impressions
            .get(subject_id)
            .map(|list| {
                list.iter()
                    .filter(|imp| imp.sent_at < cutoff)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        expired.sort_by_key(|imp| imp.sent_at);
        Ok(expired)
    }

    async fn delete(&self, subject_id: &str, impressions: &[PendingImpression]) -> Result<usize> {
        let mut removed = 0;
        let now_empty = match self.impressions.get_mut(subject_id) {
            Some(mut list) => {
                let before = list.len();
                list.retain(|imp| !impressions.contains(imp));
                removed = before - list.len();
                list.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.impressions.remove(subject_id);
        }
        Ok(removed)
    }

    async fn subjects(&self) -> Result<Vec<String>> {
        let mut subjects: Vec<String> = self
            .impressions
            .iter()
            .filter(|entry| !entry.value().is_empty())
            .map(|entry| entry.key().clone())
            .collect();
        subjects.sort();
        Ok(subjects)
    }
}

#[derive(Default)]
pub struct InMemoryClickLog {
    clicks: DashMap<String, Vec<ClickEvent>>,
}

impl InMemoryClickLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClickLog for InMemoryClickLog {
    async fn record_click(&self, click: &ClickEvent) -> Result<()> {
        let horizon = click
            .clicked_at
            .checked_sub_signed(Duration::seconds(CLICK_RETENTION_SECS));

        let mut list = self.clicks.entry(click.subject_id.clone()).or_default();
        list.push(click.clone());
        if let Some(horizon) = horizon {
            list.retain(|c| c.clicked_at > horizon);
        }
        Ok(())
    }

    async fn clicks_since(&self, subject_id: &str, since: DateTime<Utc>) -> Result<Vec<ClickEvent>> {
        Ok(self
            .clicks
            .get(subject_id)
            .map(|list| {
                list.iter()
                    .filter(|c| c.clicked_at >= since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
