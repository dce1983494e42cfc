//! Popularity oracle: damped-mean rating score per item.
//!
//! Serves as the guaranteed fill-gap retrieval source: cheap, user-agnostic,
//! and updatable with a single counter bump per new rating.

use super::ScoringOracle;
use crate::error::Result;
use crate::models::{FeedbackEntry, ScoredItem};
use crate::store::ItemCatalog;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const MAX_RATING: f64 = 5.0;
const PRIOR_RATING: f64 = 3.0;
const PRIOR_WEIGHT: f64 = 5.0;

#[derive(Debug, Default, Clone, Copy)]
struct RatingAgg {
    count: u64,
    sum: f64,
}

impl RatingAgg {
    /// Damped mean pulled toward the prior for sparsely rated items,
    /// normalized into [0, 1].
    fn popularity_score(&self) -> f64 {
        let damped =
            (self.sum + PRIOR_WEIGHT * PRIOR_RATING) / (self.count as f64 + PRIOR_WEIGHT);
        damped / MAX_RATING
    }
}

pub struct PopularityOracle {
    catalog: Arc<ItemCatalog>,
    ratings: DashMap<i64, RatingAgg>,
    fitted: AtomicBool,
}

impl PopularityOracle {
    pub fn new(catalog: Arc<ItemCatalog>) -> Self {
        Self {
            catalog,
            ratings: DashMap::new(),
            fitted: AtomicBool::new(false),
        }
    }

    /// Rebuild the per-item aggregates from historical ratings.
    pub fn fit(&self, ratings: &[FeedbackEntry]) {
        self.ratings.clear();
        for entry in ratings {
            self.record_rating(entry.item_id, entry.rating);
        }
        self.fitted.store(true, Ordering::Release);
    }

    /// Incremental counter bump for one new rating.
    pub fn record_rating(&self, item_id: i64, rating: f64) {
        let mut agg = self.ratings.entry(item_id).or_default();
        agg.count += 1;
        agg.sum += rating;
    }

    pub fn rating_count(&self, item_id: i64) -> u64 {
        self.ratings.get(&item_id).map(|agg| agg.count).unwrap_or(0)
    }
}

#[async_trait]
impl ScoringOracle for PopularityOracle {
    fn name(&self) -> &'static str {
        "popularity"
    }

    fn is_ready(&self) -> bool {
        self.fitted.load(Ordering::Acquire) && !self.ratings.is_empty()
    }

    async fn predict(
        &self,
        _user_id: i64,
        n: usize,
        exclude_seen: bool,
        history: &[i64],
    ) -> Result<Vec<ScoredItem>> {
        let seen: HashSet<i64> = if exclude_seen {
            history.iter().copied().collect()
        } else {
            HashSet::new()
        };

        let mut scored: Vec<(i64, f64)> = self
            .ratings
            .iter()
            .filter(|entry| !seen.contains(entry.key()))
            .map(|entry| (*entry.key(), entry.value().popularity_score()))
            .collect();

        // Tie-break on item id so repeated calls stay deterministic.
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(n);

        Ok(scored
            .into_iter()
            .map(|(item_id, score)| ScoredItem {
                item_id,
                title: self.catalog.title_of(item_id),
                score,
                reason: "popularity".to_string(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entry(item_id: i64, rating: f64) -> FeedbackEntry {
        FeedbackEntry {
            user_id: 1,
            item_id,
            rating,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_not_ready_before_fit() {
        let oracle = PopularityOracle::new(Arc::new(ItemCatalog::new()));
        assert!(!oracle.is_ready());

        oracle.fit(&[entry(1, 5.0)]);
        assert!(oracle.is_ready());
    }

    #[tokio::test]
    async fn test_heavily_rated_items_rank_first() {
        let oracle = PopularityOracle::new(Arc::new(ItemCatalog::new()));
        let mut ratings = vec![entry(2, 4.0)];
        for _ in 0..20 {
            ratings.push(entry(1, 5.0));
        }
        oracle.fit(&ratings);

        let items = oracle.predict(7, 2, false, &[]).await.unwrap();
        assert_eq!(items[0].item_id, 1);
        assert!(items[0].score > items[1].score);
    }

    #[tokio::test]
    async fn test_exclude_seen() {
        let oracle = PopularityOracle::new(Arc::new(ItemCatalog::new()));
        oracle.fit(&[entry(1, 5.0), entry(2, 4.0)]);

        let items = oracle.predict(7, 10, true, &[1]).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].item_id, 2);
    }
}
