//! Multi-source candidate retrieval.
//!
//! Fans out to the collaborative and content-based oracles concurrently,
//! then asks popularity to fill whatever the personalized sources left
//! short. A source failing, timing out, or being unfitted never aborts
//! generation from the remaining sources.

use crate::metrics;
use crate::models::{Candidate, CandidateSource, ScoredItem};
use crate::services::scoring::{ModelRegistry, ScoringOracle};
use crate::store::ItemCatalog;
use futures::future::join;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

const COLLABORATIVE_SHARE: f64 = 0.4;
const CONTENT_SHARE: f64 = 0.3;
const POPULARITY_SHARE: f64 = 0.3;

pub struct CandidateGenerator {
    catalog: Arc<ItemCatalog>,
    collaborative: Arc<dyn ScoringOracle>,
    content_based: Arc<dyn ScoringOracle>,
    popularity: Arc<dyn ScoringOracle>,
    oracle_timeout: Duration,
}

impl CandidateGenerator {
    pub fn new(
        registry: &ModelRegistry,
        catalog: Arc<ItemCatalog>,
        oracle_timeout: Duration,
    ) -> Self {
        Self {
            catalog,
            collaborative: registry.collaborative(),
            content_based: registry.content_based(),
            popularity: registry.popularity(),
            oracle_timeout,
        }
    }

    /// Retrieve a deduplicated candidate pool for a user.
    ///
    /// The pool may legitimately be smaller than `n_candidates` when the
    /// sources cannot supply enough distinct items; nothing is padded.
    pub async fn get_candidates(
        &self,
        user_id: i64,
        n_candidates: usize,
        history: &[i64],
    ) -> Vec<Candidate> {
        let n_cf = (n_candidates as f64 * COLLABORATIVE_SHARE) as usize;
        let n_cb = (n_candidates as f64 * CONTENT_SHARE) as usize;

        let (cf_items, cb_items) = join(
            self.fetch(&self.collaborative, user_id, n_cf, history),
            self.fetch(&self.content_based, user_id, n_cb, history),
        )
        .await;

        let mut pool = Vec::with_capacity(n_candidates);
        let mut seen_ids = HashSet::new();
        self.merge(&mut pool, &mut seen_ids, cf_items, CandidateSource::Collaborative);
        self.merge(&mut pool, &mut seen_ids, cb_items, CandidateSource::ContentBased);

        // Popularity is the fill-gap source: at least its flat share, and
        // however much the earlier sources under-delivered.
        let n_pop = std::cmp::max(
            (n_candidates as f64 * POPULARITY_SHARE) as usize,
            n_candidates.saturating_sub(pool.len()),
        );
        let pop_items = self.fetch(&self.popularity, user_id, n_pop, history).await;
        self.merge(&mut pool, &mut seen_ids, pop_items, CandidateSource::Popularity);

        debug!(
            user_id,
            pool = pool.len(),
            requested = n_candidates,
            "Candidate pool assembled"
        );
        pool
    }

    async fn fetch(
        &self,
        oracle: &Arc<dyn ScoringOracle>,
        user_id: i64,
        n: usize,
        history: &[i64],
    ) -> Vec<ScoredItem> {
        if n == 0 {
            return Vec::new();
        }
        if !oracle.is_ready() {
            debug!("Source {} not ready, skipping", oracle.name());
            return Vec::new();
        }

        match timeout(self.oracle_timeout, oracle.predict(user_id, n, true, history)).await {
            Ok(Ok(items)) => items,
            Ok(Err(e)) => {
                warn!("Candidate source {} failed: {}", oracle.name(), e);
                metrics::record_oracle_failure(oracle.name());
                Vec::new()
            }
            Err(_) => {
                warn!(
                    "Candidate source {} timed out after {:?}",
                    oracle.name(),
                    self.oracle_timeout
                );
                metrics::record_oracle_failure(oracle.name());
                Vec::new()
            }
        }
    }

    /// First-seen item wins: a later source contributing the same item id
    /// is dropped, so priority order decides which source owns it.
    fn merge(
        &self,
        pool: &mut Vec<Candidate>,
        seen_ids: &mut HashSet<i64>,
        items: Vec<ScoredItem>,
        source: CandidateSource,
    ) {
        for item in items {
            if seen_ids.insert(item.item_id) {
                pool.push(Candidate {
                    item_id: item.item_id,
                    title: item.title,
                    genres: self.catalog.genres_of(item.item_id),
                    initial_score: item.score,
                    source,
                    reason: item.reason,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AppError, Result};
    use async_trait::async_trait;

    /// Configurable stub source for failure-isolation tests.
    struct StubOracle {
        name: &'static str,
        ready: bool,
        items: Vec<i64>,
        fail: bool,
        delay: Option<Duration>,
    }

    impl StubOracle {
        fn serving(name: &'static str, items: Vec<i64>) -> Self {
            Self {
                name,
                ready: true,
                items,
                fail: false,
                delay: None,
            }
        }

        fn unfitted(name: &'static str) -> Self {
            Self {
                name,
                ready: false,
                items: vec![],
                fail: false,
                delay: None,
            }
        }

        fn failing(name: &'static str) -> Self {
            Self {
                name,
                ready: true,
                items: vec![],
                fail: true,
                delay: None,
            }
        }
    }

    #[async_trait]
    impl ScoringOracle for StubOracle {
        fn name(&self) -> &'static str {
            self.name
        }

        fn is_ready(&self) -> bool {
            self.ready
        }

        async fn predict(
            &self,
            _user_id: i64,
            n: usize,
            _exclude_seen: bool,
            _history: &[i64],
        ) -> Result<Vec<ScoredItem>> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                return Err(AppError::BackendUnavailable("stub down".to_string()));
            }
            Ok(self
                .items
                .iter()
                .take(n)
                .enumerate()
                .map(|(i, id)| ScoredItem {
                    item_id: *id,
                    title: format!("Item {}", id),
                    score: 0.9 - i as f64 * 0.05,
                    reason: "stub".to_string(),
                })
                .collect())
        }
    }

    fn generator(
        collaborative: StubOracle,
        content_based: StubOracle,
        popularity: StubOracle,
    ) -> CandidateGenerator {
        CandidateGenerator {
            catalog: Arc::new(ItemCatalog::new()),
            collaborative: Arc::new(collaborative),
            content_based: Arc::new(content_based),
            popularity: Arc::new(popularity),
            oracle_timeout: Duration::from_millis(100),
        }
    }

    #[tokio::test]
    async fn test_no_duplicate_item_ids() {
        let generator = generator(
            StubOracle::serving("collaborative", vec![1, 2, 3]),
            StubOracle::serving("content_based", vec![2, 3, 4]),
            StubOracle::serving("popularity", vec![1, 4, 5, 6]),
        );

        let pool = generator.get_candidates(1, 10, &[]).await;
        let mut ids: Vec<i64> = pool.iter().map(|c| c.item_id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), pool.len());
    }

    #[tokio::test]
    async fn test_priority_source_owns_shared_items() {
        let generator = generator(
            StubOracle::serving("collaborative", vec![1]),
            StubOracle::serving("content_based", vec![1, 2]),
            StubOracle::serving("popularity", vec![2, 3]),
        );

        let pool = generator.get_candidates(1, 10, &[]).await;
        let item1 = pool.iter().find(|c| c.item_id == 1).unwrap();
        assert_eq!(item1.source, CandidateSource::Collaborative);
        let item2 = pool.iter().find(|c| c.item_id == 2).unwrap();
        assert_eq!(item2.source, CandidateSource::ContentBased);
    }

    #[tokio::test]
    async fn test_popularity_fills_gap_when_sources_fail() {
        let generator = generator(
            StubOracle::failing("collaborative"),
            StubOracle::unfitted("content_based"),
            StubOracle::serving("popularity", (1..=20).collect()),
        );

        let pool = generator.get_candidates(1, 10, &[]).await;
        assert_eq!(pool.len(), 10);
        assert!(pool
            .iter()
            .all(|c| c.source == CandidateSource::Popularity));
    }

    #[tokio::test]
    async fn test_timeout_treated_as_source_failure() {
        let mut slow = StubOracle::serving("collaborative", vec![1, 2]);
        slow.delay = Some(Duration::from_millis(500));

        let generator = generator(
            slow,
            StubOracle::unfitted("content_based"),
            StubOracle::serving("popularity", vec![7, 8, 9]),
        );

        let pool = generator.get_candidates(1, 3, &[]).await;
        assert!(pool.iter().all(|c| c.source == CandidateSource::Popularity));
        assert_eq!(pool.len(), 3);
    }

    #[tokio::test]
    async fn test_undersupply_returns_short_pool() {
        let generator = generator(
            StubOracle::serving("collaborative", vec![1]),
            StubOracle::serving("content_based", vec![2]),
            StubOracle::serving("popularity", vec![3]),
        );

        let pool = generator.get_candidates(1, 100, &[]).await;
        assert_eq!(pool.len(), 3);
    }
}
