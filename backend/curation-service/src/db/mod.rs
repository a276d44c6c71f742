// ============================================
// Storage Ports (存儲接口)
// ============================================
//
// The core never owns durability. It talks to three ports:
// - BanditStateStore: one LinUCB model per subject
// - ImpressionStore: items delivered but not yet resolved
// - ClickLog: observed clicks, used to tell engaged impressions apart
//
// Each port has an in-memory implementation (tests, single-node dev) and a
// Redis implementation.

pub mod memory;
pub mod redis_store;

pub use memory::{InMemoryBanditStore, InMemoryClickLog, InMemoryImpressionStore};
pub use redis_store::{RedisBanditStore, RedisClickLog, RedisImpressionStore};

use crate::models::{ClickEvent, PendingImpression};
use crate::services::bandit::BanditModelState;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Redis(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Clicks older than this (relative to the newest click) can never match a
/// pending impression again and are trimmed on write
pub const CLICK_RETENTION_SECS: i64 = 14 * 24 * 3600;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BanditStateStore: Send + Sync {
    async fn get(&self, subject_id: &str) -> Result<Option<BanditModelState>>;

    async fn put(&self, subject_id: &str, state: &BanditModelState) -> Result<()>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImpressionStore: Send + Sync {
    async fn append(&self, impression: &PendingImpression) -> Result<()>;

    /// Impressions for `subject_id` with `sent_at < cutoff`, oldest first
    async fn list_older_than(
        &self,
        subject_id: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<PendingImpression>>;

    /// Remove the given impressions; returns how many were actually removed
    async fn delete(&self, subject_id: &str, impressions: &[PendingImpression]) -> Result<usize>;

    /// Subjects that currently have at least one pending impression
    async fn subjects(&self) -> Result<Vec<String>>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClickLog: Send + Sync {
    async fn record_click(&self, click: &ClickEvent) -> Result<()>;

    async fn clicks_since(&self, subject_id: &str, since: DateTime<Utc>) -> Result<Vec<ClickEvent>>;
}
