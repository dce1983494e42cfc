pub mod candidates;
pub mod experiments;
pub mod ingestion;
pub mod online_learning;
pub mod ranking;
pub mod recommendation;
pub mod scoring;

pub use candidates::CandidateGenerator;
pub use experiments::{
    Experiment, ExperimentGroup, ExperimentInfo, ExperimentManager, GroupAssignment,
    SERVING_EXPERIMENT_ID,
};
pub use ingestion::{EventIngestor, EventReceipt};
pub use online_learning::{
    spawn_update_worker, FeedbackStatus, LearnerStats, OnlineLearner, OnlineLearnerConfig,
    UpdateOutcome,
};
pub use ranking::{LinearRankingModel, Ranker, RankingModel};
pub use recommendation::RecommendationService;
pub use scoring::{
    CollaborativeOracle, ContentBasedOracle, HybridOracle, HybridWeights, IncrementalUpdate,
    ModelRegistry, PopularityOracle, ScoringOracle,
};
