//! Scoring oracle capability and the model registry.
//!
//! Each ranking strategy is consumed through the same narrow seam:
//! `predict(user, n) -> ranked items` plus a readiness flag. The reference
//! implementations here are deliberately simple aggregates; the statistical
//! internals of real popularity/matrix-factorization/TF-IDF models live
//! outside this service and can be swapped in behind the same trait.

pub mod collaborative;
pub mod content_based;
pub mod hybrid;
pub mod popularity;

pub use collaborative::CollaborativeOracle;
pub use content_based::ContentBasedOracle;
pub use hybrid::{HybridOracle, HybridWeights};
pub use popularity::PopularityOracle;

use crate::error::Result;
use crate::models::{FeedbackEntry, ModelKind, ScoredItem};
use crate::store::ItemCatalog;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// A ranking strategy consumed as a black-box capability.
#[async_trait]
pub trait ScoringOracle: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether the model behind this oracle has been fitted. Callers must
    /// check this before `predict`.
    fn is_ready(&self) -> bool;

    /// Ranked items for a user. `history` holds item ids the user has
    /// already interacted with; when `exclude_seen` is set those items must
    /// not appear in the result.
    async fn predict(
        &self,
        user_id: i64,
        n: usize,
        exclude_seen: bool,
        history: &[i64],
    ) -> Result<Vec<ScoredItem>>;
}

/// Models that can absorb a batch of buffered feedback without a full
/// offline retrain.
#[async_trait]
pub trait IncrementalUpdate: Send + Sync {
    async fn apply_feedback(&self, batch: &[FeedbackEntry]) -> Result<()>;
}

/// Owns one oracle per strategy and resolves which one serves a request.
pub struct ModelRegistry {
    popularity: Arc<PopularityOracle>,
    collaborative: Arc<CollaborativeOracle>,
    content_based: Arc<ContentBasedOracle>,
    hybrid: Arc<HybridOracle>,
}

impl ModelRegistry {
    pub fn new(catalog: Arc<ItemCatalog>) -> Self {
        let popularity = Arc::new(PopularityOracle::new(catalog.clone()));
        let collaborative = Arc::new(CollaborativeOracle::new(catalog.clone()));
        let content_based = Arc::new(ContentBasedOracle::new(catalog));
        let hybrid = Arc::new(HybridOracle::new(
            popularity.clone(),
            collaborative.clone(),
            content_based.clone(),
            HybridWeights::default(),
        ));

        Self {
            popularity,
            collaborative,
            content_based,
            hybrid,
        }
    }

    pub fn oracle(&self, kind: ModelKind) -> Arc<dyn ScoringOracle> {
        match kind {
            ModelKind::Hybrid => self.hybrid.clone(),
            ModelKind::Collaborative => self.collaborative.clone(),
            ModelKind::ContentBased => self.content_based.clone(),
            ModelKind::Popularity => self.popularity.clone(),
        }
    }

    pub fn popularity(&self) -> Arc<PopularityOracle> {
        self.popularity.clone()
    }

    pub fn collaborative(&self) -> Arc<CollaborativeOracle> {
        self.collaborative.clone()
    }

    pub fn content_based(&self) -> Arc<ContentBasedOracle> {
        self.content_based.clone()
    }

    pub fn hybrid(&self) -> Arc<HybridOracle> {
        self.hybrid.clone()
    }

    /// Resolve which model serves a request: the requested one when ready,
    /// otherwise the first ready model in the fallback chain. `None` when
    /// nothing is fitted yet.
    pub fn resolve_serving(&self, requested: ModelKind) -> Option<ModelKind> {
        if self.oracle(requested).is_ready() {
            return Some(requested);
        }
        ModelKind::FALLBACK_CHAIN
            .into_iter()
            .find(|kind| self.oracle(*kind).is_ready())
    }

    /// Models the online learner refreshes, in update order.
    pub fn incremental_models(&self) -> Vec<(&'static str, Arc<dyn IncrementalUpdate>)> {
        vec![
            ("collaborative", self.collaborative.clone() as Arc<dyn IncrementalUpdate>),
            ("hybrid", self.hybrid.clone() as Arc<dyn IncrementalUpdate>),
        ]
    }

    /// Fit every strategy from historical ratings (and the catalog for the
    /// content model). Used at startup and by tests.
    pub async fn fit_from_history(&self, ratings: &[FeedbackEntry]) -> Result<()> {
        self.popularity.fit(ratings);
        self.collaborative.fit(ratings).await;
        self.content_based.fit()?;
        self.hybrid.refit();
        info!(
            ratings = ratings.len(),
            "Scoring models fitted from history"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ItemMeta;
    use chrono::Utc;

    fn catalog_with_items(n: i64) -> Arc<ItemCatalog> {
        let catalog = Arc::new(ItemCatalog::new());
        for i in 1..=n {
            catalog.upsert(ItemMeta {
                item_id: i,
                title: format!("Item {}", i),
                genres: vec!["drama".to_string()],
                release_year: Some(2000 + i as i32),
            });
        }
        catalog
    }

    fn rating(user_id: i64, item_id: i64, rating: f64) -> FeedbackEntry {
        FeedbackEntry {
            user_id,
            item_id,
            rating,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_resolve_serving_prefers_requested() {
        let registry = ModelRegistry::new(catalog_with_items(5));
        let ratings: Vec<FeedbackEntry> =
            (1..=5).map(|i| rating(i, i, 4.0)).collect();
        registry.fit_from_history(&ratings).await.unwrap();

        assert_eq!(
            registry.resolve_serving(ModelKind::Popularity),
            Some(ModelKind::Popularity)
        );
        assert_eq!(
            registry.resolve_serving(ModelKind::Hybrid),
            Some(ModelKind::Hybrid)
        );
    }

    #[tokio::test]
    async fn test_resolve_serving_falls_back_when_unfitted() {
        let registry = ModelRegistry::new(catalog_with_items(5));
        // Only popularity fitted: hybrid requests resolve to popularity.
        registry
            .popularity()
            .fit(&[rating(1, 1, 5.0), rating(2, 2, 4.0)]);

        assert_eq!(
            registry.resolve_serving(ModelKind::Hybrid),
            Some(ModelKind::Popularity)
        );
    }

    #[test]
    fn test_resolve_serving_none_when_nothing_fitted() {
        let registry = ModelRegistry::new(catalog_with_items(2));
        assert_eq!(registry.resolve_serving(ModelKind::Hybrid), None);
    }
}
