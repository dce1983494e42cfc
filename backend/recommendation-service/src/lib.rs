pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod metrics;
pub mod models;
pub mod services;
pub mod store;
pub mod telemetry;

pub use config::Config;
pub use context::RecommenderContext;
pub use error::{AppError, Result};

// Re-export serving pipeline components
pub use cache::{CacheStats, RecommendationCache};
pub use services::{
    CandidateGenerator, EventIngestor, Experiment, ExperimentGroup, ExperimentManager,
    GroupAssignment, HybridOracle, LinearRankingModel, ModelRegistry, OnlineLearner,
    OnlineLearnerConfig, Ranker, RankingModel, RecommendationService, ScoringOracle,
};
