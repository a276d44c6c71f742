pub mod bandit;
pub mod curation;
pub mod decay;
pub mod scoring;
pub mod selection;
pub mod vector_math;

pub use bandit::{BanditError, BanditService, LinUcbEngine};
pub use curation::CurationService;
pub use decay::{DecayError, RewardDecayProcess};
pub use scoring::ScoringPipeline;
pub use selection::SelectionEngine;
