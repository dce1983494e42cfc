//! Read-path orchestrator.
//!
//! request → experiment resolves strategy → cache lookup → on miss,
//! candidate generation → learned re-rank → cache store → respond.
//!
//! A request always receives an ordered list: when no oracle is ready (or
//! the pool comes back empty) a static fallback list is served instead of
//! an error.

use crate::cache::RecommendationCache;
use crate::error::Result;
use crate::metrics;
use crate::models::{
    CandidateSource, ModelKind, RankedCandidate, RecommendationRequest, RecommendationResponse,
    UserRatingStats,
};
use crate::services::candidates::CandidateGenerator;
use crate::services::experiments::{ExperimentManager, SERVING_EXPERIMENT_ID};
use crate::services::ranking::{Ranker, NEUTRAL_RATING};
use crate::services::scoring::ModelRegistry;
use crate::store::{EventStore, ItemStatsStore, ProfileStore};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

const MAX_RECOMMENDATIONS: usize = 100;
const FALLBACK_MODEL_VERSION: &str = "fallback_v1.0";

pub struct RecommendationService {
    cache: Arc<RecommendationCache>,
    registry: Arc<ModelRegistry>,
    generator: CandidateGenerator,
    ranker: Ranker,
    experiments: Arc<ExperimentManager>,
    store: Arc<dyn EventStore>,
    profiles: Arc<ProfileStore>,
    item_stats: Arc<ItemStatsStore>,
    pool_size: usize,
}

impl RecommendationService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cache: Arc<RecommendationCache>,
        registry: Arc<ModelRegistry>,
        generator: CandidateGenerator,
        ranker: Ranker,
        experiments: Arc<ExperimentManager>,
        store: Arc<dyn EventStore>,
        profiles: Arc<ProfileStore>,
        item_stats: Arc<ItemStatsStore>,
        pool_size: usize,
    ) -> Self {
        Self {
            cache,
            registry,
            generator,
            ranker,
            experiments,
            store,
            profiles,
            item_stats,
            pool_size,
        }
    }

    /// Serve a ranked recommendation list.
    pub async fn recommend(
        &self,
        request: RecommendationRequest,
    ) -> Result<RecommendationResponse> {
        let n = request.n_recommendations.clamp(1, MAX_RECOMMENDATIONS);
        let resolved = self.resolve_model_type(request.user_id, request.model_type);

        if let Some(recommendations) = self.cache.get(request.user_id, resolved, n).await {
            return Ok(RecommendationResponse {
                user_id: request.user_id,
                recommendations,
                model_version: format!("{}_v1.0_cached", resolved.as_str()),
                timestamp: Utc::now(),
            });
        }

        let (recommendations, model_version) = self
            .generate(request.user_id, resolved, n, request.exclude_seen)
            .await;

        self.cache
            .set(request.user_id, resolved, &recommendations, n, None)
            .await;

        Ok(RecommendationResponse {
            user_id: request.user_id,
            recommendations,
            model_version,
            timestamp: Utc::now(),
        })
    }

    /// Pre-compute and cache lists for a user across model kinds. Returns
    /// per-kind success.
    pub async fn warm_cache(
        &self,
        user_id: i64,
        kinds: &[ModelKind],
        n: usize,
    ) -> HashMap<ModelKind, bool> {
        let n = n.clamp(1, MAX_RECOMMENDATIONS);
        let mut results = HashMap::new();
        for kind in kinds {
            let (recommendations, _) = self.generate(user_id, *kind, n, true).await;
            let cached = !recommendations.is_empty()
                && self
                    .cache
                    .set(user_id, *kind, &recommendations, n, None)
                    .await;
            results.insert(*kind, cached);
        }
        results
    }

    /// Active experiments may override the requested strategy for this user
    /// via their group's `model` parameter.
    fn resolve_model_type(&self, user_id: i64, requested: ModelKind) -> ModelKind {
        if let Some(assignment) = self
            .experiments
            .get_group_config(user_id, SERVING_EXPERIMENT_ID)
        {
            if let Some(model) = assignment.params.get("model").and_then(|v| v.as_str()) {
                match model.parse::<ModelKind>() {
                    Ok(kind) => {
                        debug!(
                            user_id,
                            group = %assignment.group_name,
                            model = %kind,
                            "Experiment group overrides model type"
                        );
                        return kind;
                    }
                    Err(_) => {
                        warn!(
                            "Experiment group {} names unknown model type {}",
                            assignment.group_name, model
                        );
                    }
                }
            }
        }
        requested
    }

    /// Compute a fresh ranked list and the model version that served it.
    async fn generate(
        &self,
        user_id: i64,
        kind: ModelKind,
        n: usize,
        exclude_seen: bool,
    ) -> (Vec<RankedCandidate>, String) {
        let Some(served) = self.registry.resolve_serving(kind) else {
            debug!(user_id, "No scoring model ready, serving static fallback");
            return (static_fallback(n), FALLBACK_MODEL_VERSION.to_string());
        };

        let history = if exclude_seen {
            match self.store.seen_items(user_id).await {
                Ok(items) => items,
                Err(e) => {
                    warn!("Failed to load history for user {}: {}", user_id, e);
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let pool_target = self.pool_size.max(n);
        let candidates = self
            .generator
            .get_candidates(user_id, pool_target, &history)
            .await;
        if candidates.is_empty() {
            debug!(user_id, "Empty candidate pool, serving static fallback");
            return (static_fallback(n), FALLBACK_MODEL_VERSION.to_string());
        }

        let user_stats = self.profiles.get(user_id).map(|profile| UserRatingStats {
            avg_rating: profile.avg_rating.unwrap_or(NEUTRAL_RATING),
            rating_count: profile.total_ratings,
        });
        let candidate_ids: Vec<i64> = candidates.iter().map(|c| c.item_id).collect();
        let item_stats = self.item_stats.snapshot_for(&candidate_ids);

        let mut ranked = self
            .ranker
            .predict(user_id, candidates, user_stats.as_ref(), &item_stats);
        ranked.truncate(n);

        metrics::record_recommendation_served(served.as_str());
        (ranked, format!("{}_v1.0", served.as_str()))
    }
}

/// Last-resort static list so a request never sees an error.
fn static_fallback(n: usize) -> Vec<RankedCandidate> {
    (1..=n as i64)
        .map(|i| {
            let score = 0.9 - i as f64 * 0.1;
            RankedCandidate {
                item_id: i,
                title: format!("Item {}", i),
                genres: Vec::new(),
                source: CandidateSource::Popularity,
                reason: "static_fallback".to_string(),
                initial_score: score,
                final_score: score,
                ranker_contribution: 0.0,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_fallback_is_ordered_and_full() {
        let list = static_fallback(5);
        assert_eq!(list.len(), 5);
        assert!(list.windows(2).all(|w| w[0].final_score >= w[1].final_score));
        assert!(list.iter().all(|item| item.reason == "static_fallback"));
    }
}
