pub mod config;
pub mod engine;
pub mod error;
pub mod jobs;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use engine::EventRankingEngine;
pub use error::{AppError, Result};
pub use jobs::{IndexRebuildJob, RebuildOutcome, RebuildStats};
pub use services::{HybridScorer, Jitter, SimilarityService};
