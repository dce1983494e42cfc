//! Hybrid oracle: weighted blend of the collaborative and content-based
//! strategies, with popularity filling any remaining slots.
//!
//! Its online update runs in three steps: refresh the collaborative
//! sub-component, bump popularity counters, then refit the composite's
//! dependent stage.

use super::{
    CollaborativeOracle, ContentBasedOracle, IncrementalUpdate, PopularityOracle, ScoringOracle,
};
use crate::error::Result;
use crate::models::{FeedbackEntry, ScoredItem};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Blend weights over the personalized components.
#[derive(Debug, Clone, Copy)]
pub struct HybridWeights {
    pub collaborative: f64,
    pub content: f64,
}

impl Default for HybridWeights {
    fn default() -> Self {
        Self {
            collaborative: 0.7,
            content: 0.3,
        }
    }
}

pub struct HybridOracle {
    popularity: Arc<PopularityOracle>,
    collaborative: Arc<CollaborativeOracle>,
    content_based: Arc<ContentBasedOracle>,
    weights: HybridWeights,
    fitted: AtomicBool,
}

impl HybridOracle {
    pub fn new(
        popularity: Arc<PopularityOracle>,
        collaborative: Arc<CollaborativeOracle>,
        content_based: Arc<ContentBasedOracle>,
        weights: HybridWeights,
    ) -> Self {
        Self {
            popularity,
            collaborative,
            content_based,
            weights,
            fitted: AtomicBool::new(false),
        }
    }

    /// Re-fit the composite's dependent stage: the blend is servable only
    /// while its personalized sub-components are.
    pub fn refit(&self) {
        let ready = self.collaborative.is_ready() && self.content_based.is_ready();
        self.fitted.store(ready, Ordering::Release);
    }

    async fn component_scores(
        &self,
        oracle: &dyn ScoringOracle,
        user_id: i64,
        n: usize,
        exclude_seen: bool,
        history: &[i64],
    ) -> Vec<ScoredItem> {
        match oracle.predict(user_id, n, exclude_seen, history).await {
            Ok(items) => items,
            Err(e) => {
                warn!("Hybrid component {} failed: {}", oracle.name(), e);
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl ScoringOracle for HybridOracle {
    fn name(&self) -> &'static str {
        "hybrid"
    }

    fn is_ready(&self) -> bool {
        self.fitted.load(Ordering::Acquire)
            && self.collaborative.is_ready()
            && self.content_based.is_ready()
    }

    async fn predict(
        &self,
        user_id: i64,
        n: usize,
        exclude_seen: bool,
        history: &[i64],
    ) -> Result<Vec<ScoredItem>> {
        let fetch = n.saturating_mul(2).max(n);

        let cf_items = self
            .component_scores(
                self.collaborative.as_ref(),
                user_id,
                fetch,
                exclude_seen,
                history,
            )
            .await;
        let cb_items = self
            .component_scores(
                self.content_based.as_ref(),
                user_id,
                fetch,
                exclude_seen,
                history,
            )
            .await;

        let mut blended: HashMap<i64, (f64, String)> = HashMap::new();
        for item in cf_items {
            let slot = blended
                .entry(item.item_id)
                .or_insert((0.0, item.title));
            slot.0 += self.weights.collaborative * item.score;
        }
        for item in cb_items {
            let slot = blended
                .entry(item.item_id)
                .or_insert((0.0, item.title));
            slot.0 += self.weights.content * item.score;
        }

        let mut merged: Vec<ScoredItem> = blended
            .into_iter()
            .map(|(item_id, (score, title))| ScoredItem {
                item_id,
                title,
                score,
                reason: "hybrid_ranker".to_string(),
            })
            .collect();

        merged.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.item_id.cmp(&b.item_id))
        });

        // Popularity fills remaining slots for thin personalized pools.
        if merged.len() < n && self.popularity.is_ready() {
            let fill = self
                .component_scores(
                    self.popularity.as_ref(),
                    user_id,
                    fetch,
                    exclude_seen,
                    history,
                )
                .await;
            for item in fill {
                if merged.len() >= n {
                    break;
                }
                if merged.iter().all(|existing| existing.item_id != item.item_id) {
                    merged.push(ScoredItem {
                        reason: "hybrid_ranker".to_string(),
                        ..item
                    });
                }
            }
        }

        merged.truncate(n);
        Ok(merged)
    }
}

#[async_trait]
impl IncrementalUpdate for HybridOracle {
    async fn apply_feedback(&self, batch: &[FeedbackEntry]) -> Result<()> {
        // 1. Refresh the collaborative sub-component on its sliding window.
        self.collaborative.apply_feedback(batch).await?;

        // 2. Bump popularity counters incrementally.
        for entry in batch {
            self.popularity.record_rating(entry.item_id, entry.rating);
        }

        // 3. Re-fit the dependent blend stage.
        self.refit();
        Ok(())
    }
}
