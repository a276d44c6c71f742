pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod jobs;
pub mod metrics;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use error::AppError;
pub use services::{BanditService, CurationService, RewardDecayProcess, ScoringPipeline, SelectionEngine};
