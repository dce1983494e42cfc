//! Collaborative oracle: bias-model predictor over a bounded rating window.
//!
//! The training window is the online-learning surface: new feedback batches
//! are merged in, trimmed most-recent-first at `max_history`, and the model
//! refits on the result. The predictor itself is a simple
//! global-mean + user-bias + item-bias decomposition standing in for the
//! externally trained factorization model.

use super::{IncrementalUpdate, ScoringOracle};
use crate::error::Result;
use crate::models::{FeedbackEntry, ScoredItem};
use crate::store::ItemCatalog;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

const DEFAULT_MAX_HISTORY: usize = 10_000;
const MIN_RATING: f64 = 0.5;
const MAX_RATING: f64 = 5.0;

#[derive(Debug, Default)]
struct BiasState {
    global_mean: f64,
    user_bias: HashMap<i64, f64>,
    item_bias: HashMap<i64, f64>,
    rated_by_user: HashMap<i64, HashSet<i64>>,
}

pub struct CollaborativeOracle {
    catalog: Arc<ItemCatalog>,
    window: Mutex<Vec<FeedbackEntry>>,
    state: RwLock<BiasState>,
    max_history: usize,
    fitted: AtomicBool,
}

impl CollaborativeOracle {
    pub fn new(catalog: Arc<ItemCatalog>) -> Self {
        Self::with_max_history(catalog, DEFAULT_MAX_HISTORY)
    }

    pub fn with_max_history(catalog: Arc<ItemCatalog>, max_history: usize) -> Self {
        Self {
            catalog,
            window: Mutex::new(Vec::new()),
            state: RwLock::new(BiasState::default()),
            max_history,
            fitted: AtomicBool::new(false),
        }
    }

    /// Replace the window with historical ratings and refit.
    pub async fn fit(&self, ratings: &[FeedbackEntry]) {
        let snapshot = {
            let mut window = self.window.lock().await;
            *window = ratings.to_vec();
            Self::trim_window(&mut window, self.max_history);
            window.clone()
        };
        self.refit(&snapshot).await;
    }

    pub async fn window_len(&self) -> usize {
        self.window.lock().await.len()
    }

    fn trim_window(window: &mut Vec<FeedbackEntry>, max_history: usize) {
        window.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| a.user_id.cmp(&b.user_id))
                .then_with(|| a.item_id.cmp(&b.item_id))
        });
        // A batch can reach this model twice (directly and through the
        // hybrid composite); collapse exact duplicates so it is not
        // double-counted.
        window.dedup_by(|a, b| {
            a.user_id == b.user_id && a.item_id == b.item_id && a.timestamp == b.timestamp
        });
        window.truncate(max_history);
    }

    async fn refit(&self, window: &[FeedbackEntry]) {
        if window.is_empty() {
            *self.state.write().await = BiasState::default();
            self.fitted.store(false, Ordering::Release);
            return;
        }

        let global_mean =
            window.iter().map(|e| e.rating).sum::<f64>() / window.len() as f64;

        let mut user_sums: HashMap<i64, (f64, u64)> = HashMap::new();
        let mut item_sums: HashMap<i64, (f64, u64)> = HashMap::new();
        let mut rated_by_user: HashMap<i64, HashSet<i64>> = HashMap::new();

        for entry in window {
            let user = user_sums.entry(entry.user_id).or_insert((0.0, 0));
            user.0 += entry.rating;
            user.1 += 1;

            let item = item_sums.entry(entry.item_id).or_insert((0.0, 0));
            item.0 += entry.rating;
            item.1 += 1;

            rated_by_user
                .entry(entry.user_id)
                .or_default()
                .insert(entry.item_id);
        }

        let user_bias = user_sums
            .into_iter()
            .map(|(id, (sum, count))| (id, sum / count as f64 - global_mean))
            .collect();
        let item_bias = item_sums
            .into_iter()
            .map(|(id, (sum, count))| (id, sum / count as f64 - global_mean))
            .collect();

        *self.state.write().await = BiasState {
            global_mean,
            user_bias,
            item_bias,
            rated_by_user,
        };
        self.fitted.store(true, Ordering::Release);

        debug!(
            window = window.len(),
            "Collaborative model refitted"
        );
    }
}

#[async_trait]
impl ScoringOracle for CollaborativeOracle {
    fn name(&self) -> &'static str {
        "collaborative"
    }

    fn is_ready(&self) -> bool {
        self.fitted.load(Ordering::Acquire)
    }

    async fn predict(
        &self,
        user_id: i64,
        n: usize,
        exclude_seen: bool,
        history: &[i64],
    ) -> Result<Vec<ScoredItem>> {
        let state = self.state.read().await;

        let mut excluded: HashSet<i64> = if exclude_seen {
            history.iter().copied().collect()
        } else {
            HashSet::new()
        };
        // Items the user rated inside the window are never re-recommended.
        if let Some(rated) = state.rated_by_user.get(&user_id) {
            excluded.extend(rated.iter().copied());
        }

        let user_bias = state.user_bias.get(&user_id).copied().unwrap_or(0.0);

        let mut scored: Vec<(i64, f64)> = state
            .item_bias
            .iter()
            .filter(|(item_id, _)| !excluded.contains(item_id))
            .map(|(item_id, item_bias)| {
                let predicted =
                    (state.global_mean + user_bias + item_bias).clamp(MIN_RATING, MAX_RATING);
                (*item_id, predicted / MAX_RATING)
            })
            .collect();

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
                reason: "collaborative_filtering".to_string(),
            })
            .collect())
    }
}

#[async_trait]
impl IncrementalUpdate for CollaborativeOracle {
    /// Merge a feedback batch into the sliding window and refit on it.
    async fn apply_feedback(&self, batch: &[FeedbackEntry]) -> Result<()> {
        let snapshot = {
            let mut window = self.window.lock().await;
            window.extend_from_slice(batch);
            Self::trim_window(&mut window, self.max_history);
            window.clone()
        };
        self.refit(&snapshot).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn entry(user_id: i64, item_id: i64, rating: f64, age_secs: i64) -> FeedbackEntry {
        FeedbackEntry {
            user_id,
            item_id,
            rating,
            timestamp: Utc::now() - Duration::seconds(age_secs),
        }
    }

    #[tokio::test]
    async fn test_prefers_well_rated_items() {
        let oracle = CollaborativeOracle::new(Arc::new(ItemCatalog::new()));
        oracle
            .fit(&[
                entry(1, 10, 5.0, 30),
                entry(2, 10, 5.0, 20),
                entry(1, 20, 1.0, 10),
                entry(2, 20, 2.0, 5),
            ])
            .await;

        let items = oracle.predict(3, 2, false, &[]).await.unwrap();
        assert_eq!(items[0].item_id, 10);
        assert!(items[0].score > items[1].score);
    }

    #[tokio::test]
    async fn test_never_rerecommends_rated_items() {
        let oracle = CollaborativeOracle::new(Arc::new(ItemCatalog::new()));
        oracle
            .fit(&[entry(1, 10, 5.0, 10), entry(2, 20, 4.0, 5)])
            .await;

        let items = oracle.predict(1, 10, false, &[]).await.unwrap();
        assert!(items.iter().all(|item| item.item_id != 10));
    }

    #[tokio::test]
    async fn test_sliding_window_trims_oldest() {
        let catalog = Arc::new(ItemCatalog::new());
        let oracle = CollaborativeOracle::with_max_history(catalog, 3);
        oracle
            .fit(&[
                entry(1, 1, 3.0, 100),
                entry(1, 2, 3.0, 90),
                entry(1, 3, 3.0, 80),
            ])
            .await;

        oracle
            .apply_feedback(&[entry(2, 4, 5.0, 0)])
            .await
            .unwrap();

        // Window capped at 3, newest retained, oldest (item 1) dropped.
        assert_eq!(oracle.window_len().await, 3);
        let items = oracle.predict(9, 10, false, &[]).await.unwrap();
        assert!(items.iter().any(|item| item.item_id == 4));
        assert!(items.iter().all(|item| item.item_id != 1));
    }

    #[tokio::test]
    async fn test_duplicate_batch_not_double_counted() {
        let oracle = CollaborativeOracle::new(Arc::new(ItemCatalog::new()));
        let batch = vec![entry(1, 1, 4.0, 0)];

        oracle.apply_feedback(&batch).await.unwrap();
        oracle.apply_feedback(&batch).await.unwrap();

        assert_eq!(oracle.window_len().await, 1);
    }
}
