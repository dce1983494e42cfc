//! Explicit application context: every shared component is constructed once
//! here and injected where needed. No process-wide singletons.

use crate::cache::RecommendationCache;
use crate::config::Config;
use crate::error::Result;
use crate::models::FeedbackEntry;
use crate::services::candidates::CandidateGenerator;
use crate::services::experiments::ExperimentManager;
use crate::services::ingestion::EventIngestor;
use crate::services::online_learning::{
    spawn_update_worker, OnlineLearner, OnlineLearnerConfig,
};
use crate::services::ranking::{LinearRankingModel, Ranker};
use crate::services::recommendation::RecommendationService;
use crate::services::scoring::ModelRegistry;
use crate::store::{
    EventStore, InMemoryEventStore, ItemCatalog, ItemMeta, ItemStatsStore, ProfileStore,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub struct RecommenderContext {
    pub config: Config,
    pub cache: Arc<RecommendationCache>,
    pub store: Arc<dyn EventStore>,
    pub catalog: Arc<ItemCatalog>,
    pub profiles: Arc<ProfileStore>,
    pub item_stats: Arc<ItemStatsStore>,
    pub registry: Arc<ModelRegistry>,
    pub experiments: Arc<ExperimentManager>,
    pub learner: Arc<OnlineLearner>,
    pub ingestor: Arc<EventIngestor>,
    pub recommender: Arc<RecommendationService>,
    update_worker: JoinHandle<()>,
}

impl RecommenderContext {
    /// Wire every component from configuration and start the background
    /// refresh worker. Redis being unreachable is not fatal; the cache
    /// degrades to memory-only.
    pub async fn initialize(config: Config) -> Result<Self> {
        let cache = Arc::new(
            RecommendationCache::connect(config.redis.url.as_deref(), &config.cache).await,
        );
        let store: Arc<dyn EventStore> = Arc::new(InMemoryEventStore::new());
        let catalog = Arc::new(ItemCatalog::new());
        let profiles = Arc::new(ProfileStore::new());
        let item_stats = Arc::new(ItemStatsStore::new());
        let registry = Arc::new(ModelRegistry::new(catalog.clone()));

        let experiments = Arc::new(match &config.experiments.config_path {
            Some(path) => ExperimentManager::load_from_file(path)?,
            None => ExperimentManager::with_defaults(),
        });

        let ranker = match &config.ranking.model_path {
            Some(path) => match LinearRankingModel::load(path) {
                Ok(model) => {
                    info!(%path, "Ranking model loaded");
                    Ranker::with_model(catalog.clone(), Arc::new(model))
                }
                Err(e) => {
                    warn!("Ranking model unavailable ({}), serving without it", e);
                    Ranker::new(catalog.clone())
                }
            },
            None => Ranker::new(catalog.clone()),
        };

        let generator = CandidateGenerator::new(
            &registry,
            catalog.clone(),
            Duration::from_millis(config.candidates.oracle_timeout_ms),
        );

        let learner = Arc::new(OnlineLearner::new(OnlineLearnerConfig::from(
            &config.online_learning,
        )));
        let update_signal = Arc::new(Notify::new());
        let update_worker =
            spawn_update_worker(learner.clone(), registry.clone(), update_signal.clone());

        let ingestor = Arc::new(EventIngestor::new(
            store.clone(),
            profiles.clone(),
            item_stats.clone(),
            cache.clone(),
            learner.clone(),
            update_signal,
        ));

        let recommender = Arc::new(RecommendationService::new(
            cache.clone(),
            registry.clone(),
            generator,
            ranker,
            experiments.clone(),
            store.clone(),
            profiles.clone(),
            item_stats.clone(),
            config.candidates.pool_size,
        ));

        info!(env = %config.app.env, "Recommender context initialized");

        Ok(Self {
            config,
            cache,
            store,
            catalog,
            profiles,
            item_stats,
            registry,
            experiments,
            learner,
            ingestor,
            recommender,
            update_worker,
        })
    }

    /// Load item metadata into the catalog.
    pub fn seed_catalog(&self, items: Vec<ItemMeta>) {
        for item in items {
            self.catalog.upsert(item);
        }
    }

    /// Fit every scoring model from historical ratings, and seed the
    /// per-item aggregates the ranker reads.
    pub async fn fit_models(&self, ratings: &[FeedbackEntry]) -> Result<()> {
        for entry in ratings {
            self.item_stats.record(entry.item_id, entry.rating);
        }
        self.registry.fit_from_history(ratings).await
    }

    /// Drain any buffered feedback, then stop the background worker.
    pub async fn shutdown(self) {
        if self.learner.stats().await.buffer_size > 0 {
            let outcome = self.learner.trigger_update(&self.registry).await;
            info!(
                feedback = outcome.feedback_count,
                "Flushed feedback buffer on shutdown"
            );
        }
        self.update_worker.abort();
        info!("Recommender context shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_initialize_without_redis() {
        let context = RecommenderContext::initialize(Config::default())
            .await
            .unwrap();

        let stats = context.cache.stats().await;
        assert!(!stats.redis_available);
        assert_eq!(context.experiments.len(), 1);

        context.shutdown().await;
    }
}
