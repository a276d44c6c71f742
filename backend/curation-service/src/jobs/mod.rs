// ============================================
// Background Jobs Module (後台任務模組)
// ============================================
//
// Contains background job runners for:
// 1. Reward decay (expired, unclicked impressions → reward 0)
//
// These jobs can be triggered via:
// - CronJob (Kubernetes) with CURATION_DECAY_RUN_ONCE=true
// - Command line argument (--mode decay)
// - In-process loop started by the server (CURATION_DECAY_ENABLED)

pub mod reward_decay;

pub use reward_decay::{DecaySweepStats, RewardDecayJob};
