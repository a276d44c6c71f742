// ============================================
// Bandit Module (探索模块)
// ============================================
//
// Per-subject contextual bandit (LinUCB) that learns from feedback:
// 1. Clicks and explicit interest signals → reward 1.0 (or caller-supplied)
// 2. Expired, unclicked impressions → reward 0.0 (see services::decay)
// 3. score() turns the learned model into an exploration signal per candidate
//
// Lifecycle per subject: Uninitialized → Ready. The model is created lazily
// (A = I, b = 0) on first access and persisted through BanditStateStore after
// every applied update.

pub mod linucb;
pub mod service;
pub mod state;

pub use linucb::{LinUcbEngine, ScoreOutcome, UpdateOutcome};
pub use service::BanditService;
pub use state::BanditModelState;

use crate::db::StoreError;
use crate::services::vector_math::VectorMathError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BanditError {
    #[error("Corrupt bandit state: {0}")]
    CorruptState(String),

    #[error("Vector math error: {0}")]
    Math(#[from] VectorMathError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Bandit task panicked: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, BanditError>;
