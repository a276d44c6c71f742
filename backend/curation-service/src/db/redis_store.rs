// Redis-backed storage
//
// Keys:
// - bandit:{subject}          - JSON BanditModelState
// - impressions:{subject}     - Sorted set of JSON PendingImpression by sent_at (ms)
// - impressions:subjects      - Set of subjects with pending impressions
// - clicks:{subject}          - Sorted set of JSON ClickEvent by clicked_at (ms)

use super::{BanditStateStore, ClickLog, ImpressionStore, Result, CLICK_RETENTION_SECS};
use crate::models::{ClickEvent, PendingImpression};
use crate::services::bandit::BanditModelState;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use tracing::{debug, warn};

pub struct RedisBanditStore {
    redis: redis::Client,
    key_prefix: String,
}

impl RedisBanditStore {
    pub fn new(redis: redis::Client) -> Self {
        Self {
            redis,
            key_prefix: "bandit".to_string(),
        }
    }

    pub fn with_key_prefix(mut self, prefix: &str) -> Self {
        self.key_prefix = prefix.to_string();
        self
    }

    fn state_key(&self, subject_id: &str) -> String {
        format!("{}:{}", self.key_prefix, subject_id)
    }
}

#[async_trait]
impl BanditStateStore for RedisBanditStore {
    async fn get(&self, subject_id: &str) -> Result<Option<BanditModelState>> {
        let mut conn = self.redis.get_multiplexed_async_connection().await?;

        let raw: Option<String> = conn.get(self.state_key(subject_id)).await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, subject_id: &str, state: &BanditModelState) -> Result<()> {
        let mut conn = self.redis.get_multiplexed_async_connection().await?;

        let json = serde_json::to_string(state)?;
        let _: () = conn.set(self.state_key(subject_id), json).await?;

        debug!(subject = subject_id, dimension = state.dimension, "Bandit state saved");
        Ok(())
    }
}

pub struct RedisImpressionStore {
    redis: redis::Client,
    key_prefix: String,
}

impl RedisImpressionStore {
    pub fn new(redis: redis::Client) -> Self {
        Self {
            redis,
            key_prefix: "impressions".to_string(),
        }
    }

    fn impressions_key(&self, subject_id: &str) -> String {
        format!("{}:{}", self.key_prefix, subject_id)
    }

    fn subjects_key(&self) -> String {
        format!("{}:subjects", self.key_prefix)
    }
}

#[async_trait]
impl ImpressionStore for RedisImpressionStore {
    async fn append(&self, impression: &PendingImpression) -> Result<()> {
        let mut conn = self.redis.get_multiplexed_async_connection().await?;

        let member = serde_json::to_string(impression)?;
        let _: () = conn
            .zadd(
                self.impressions_key(&impression.subject_id),
                member,
                impression.sent_at.timestamp_millis(),
            )
            .await?;
        let _: () = conn
            .sadd(self.subjects_key(), &impression.subject_id)
            .await?;

        Ok(())
    }

    async fn list_older_than(
        &self,
        subject_id: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<PendingImpression>> {
        let mut conn = self.redis.get_multiplexed_async_connection().await?;

        // Exclusive upper bound: sent_at < cutoff
        let upper = format!("({}", cutoff.timestamp_millis());
        let members: Vec<String> = conn
            .zrangebyscore(self.impressions_key(subject_id), "-inf", upper)
            .await?;

        let mut impressions = Vec::with_capacity(members.len());
        for member in members {
            match serde_json::from_str::<PendingImpression>(&member) {
                Ok(imp) => impressions.push(imp),
                Err(e) => {
                    warn!(subject = subject_id, error = %e, "Dropping malformed impression");
                    let _: () = conn.zrem(self.impressions_key(subject_id), &member).await?;
                }
            }
        }

        Ok(impressions)
    }

    async fn delete(&self, subject_id: &str, impressions: &[PendingImpression]) -> Result<usize> {
        if impressions.is_empty() {
            return Ok(0);
        }

        let mut conn = self.redis.get_multiplexed_async_connection().await?;
        let key = self.impressions_key(subject_id);

        let members = impressions
            .iter()
            .map(serde_json::to_string)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let removed: usize = conn.zrem(&key, members).await?;

        let remaining: usize = conn.zcard(&key).await?;
        if remaining == 0 {
            let _: () = conn.srem(self.subjects_key(), subject_id).await?;
        }

        Ok(removed)
    }

    async fn subjects(&self) -> Result<Vec<String>> {
        let mut conn = self.redis.get_multiplexed_async_connection().await?;
        let mut subjects: Vec<String> = conn.smembers(self.subjects_key()).await?;
        subjects.sort();
        Ok(subjects)
    }
}

pub struct RedisClickLog {
    redis: redis::Client,
    key_prefix: String,
}

impl RedisClickLog {
    pub fn new(redis: redis::Client) -> Self {
        Self {
            redis,
            key_prefix: "clicks".to_string(),
        }
    }

    fn clicks_key(&self, subject_id: &str) -> String {
        format!("{}:{}", self.key_prefix, subject_id)
    }
}

#[async_trait]
impl ClickLog for RedisClickLog {
    async fn record_click(&self, click: &ClickEvent) -> Result<()> {
        let mut conn = self.redis.get_multiplexed_async_connection().await?;
        let key = self.clicks_key(&click.subject_id);

        let member = serde_json::to_string(click)?;
        let _: () = conn
            .zadd(&key, member, click.clicked_at.timestamp_millis())
            .await?;

        // Clicks older than any impression TTL can never match again
        let horizon = click.clicked_at.timestamp_millis() - CLICK_RETENTION_SECS * 1000;
        let _: () = conn.zrembyscore(&key, "-inf", horizon).await?;

        Ok(())
    }

    async fn clicks_since(&self, subject_id: &str, since: DateTime<Utc>) -> Result<Vec<ClickEvent>> {
        let mut conn = self.redis.get_multiplexed_async_connection().await?;

        let members: Vec<String> = conn
            .zrangebyscore(self.clicks_key(subject_id), since.timestamp_millis(), "+inf")
            .await?;

        Ok(members
            .iter()
            .filter_map(|m| serde_json::from_str(m).ok())
            .collect())
    }
}
