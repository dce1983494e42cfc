//! Content-based oracle: genre-overlap similarity between a user's history
//! profile and catalog items.
//!
//! Stands in for the externally trained TF-IDF similarity model; the seam
//! is the same `ScoringOracle` capability.

use super::ScoringOracle;
use crate::error::{AppError, Result};
use crate::models::ScoredItem;
use crate::store::ItemCatalog;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub struct ContentBasedOracle {
    catalog: Arc<ItemCatalog>,
    fitted: AtomicBool,
}

impl ContentBasedOracle {
    pub fn new(catalog: Arc<ItemCatalog>) -> Self {
        Self {
            catalog,
            fitted: AtomicBool::new(false),
        }
    }

    /// Mark the model ready once catalog features are available.
    pub fn fit(&self) -> Result<()> {
        if self.catalog.is_empty() {
            return Err(AppError::ModelUnavailable(
                "content model requires a non-empty item catalog".to_string(),
            ));
        }
        self.fitted.store(true, Ordering::Release);
        Ok(())
    }

    /// Genre taste profile aggregated over the user's history.
    fn taste_profile(&self, history: &[i64]) -> HashMap<String, f64> {
        let mut profile: HashMap<String, f64> = HashMap::new();
        for item_id in history {
            for genre in self.catalog.genres_of(*item_id) {
                *profile.entry(genre).or_insert(0.0) += 1.0;
            }
        }
        profile
    }
}

#[async_trait]
impl ScoringOracle for ContentBasedOracle {
    fn name(&self) -> &'static str {
        "content_based"
    }

    fn is_ready(&self) -> bool {
        self.fitted.load(Ordering::Acquire)
    }

    async fn predict(
        &self,
        _user_id: i64,
        n: usize,
        exclude_seen: bool,
        history: &[i64],
    ) -> Result<Vec<ScoredItem>> {
        let profile = self.taste_profile(history);
        if profile.is_empty() {
            // Cold user with no usable history; another source must fill.
            return Ok(Vec::new());
        }
        let profile_mass: f64 = profile.values().sum();

        let seen: HashSet<i64> = if exclude_seen {
            history.iter().copied().collect()
        } else {
            HashSet::new()
        };

        let mut scored: Vec<(i64, f64)> = self
            .catalog
            .all_items()
            .into_iter()
            .filter(|item| !seen.contains(&item.item_id))
            .filter_map(|item| {
                if item.genres.is_empty() {
                    return None;
                }
                let overlap: f64 = item
                    .genres
                    .iter()
                    .filter_map(|genre| profile.get(genre))
                    .sum();
                if overlap == 0.0 {
                    return None;
                }
                let score = overlap / (item.genres.len() as f64 * profile_mass).sqrt();
                Some((item.item_id, score.min(1.0)))
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
                reason: "content_similarity".to_string(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ItemMeta;

    fn catalog() -> Arc<ItemCatalog> {
        let catalog = Arc::new(ItemCatalog::new());
        catalog.upsert(ItemMeta {
            item_id: 1,
            title: "Space Saga".to_string(),
            genres: vec!["sci-fi".to_string(), "action".to_string()],
            release_year: Some(2010),
        });
        catalog.upsert(ItemMeta {
            item_id: 2,
            title: "Laser Quest".to_string(),
            genres: vec!["sci-fi".to_string()],
            release_year: Some(2015),
        });
        catalog.upsert(ItemMeta {
            item_id: 3,
            title: "Quiet Fields".to_string(),
            genres: vec!["romance".to_string()],
            release_year: Some(2001),
        });
        catalog
    }

    #[tokio::test]
    async fn test_fit_requires_catalog() {
        let oracle = ContentBasedOracle::new(Arc::new(ItemCatalog::new()));
        assert!(oracle.fit().is_err());
        assert!(!oracle.is_ready());
    }

    #[tokio::test]
    async fn test_recommends_similar_genres() {
        let oracle = ContentBasedOracle::new(catalog());
        oracle.fit().unwrap();

        // History is item 1 (sci-fi/action); item 2 shares sci-fi, item 3
        // shares nothing.
        let items = oracle.predict(7, 10, true, &[1]).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].item_id, 2);
        assert_eq!(items[0].reason, "content_similarity");
    }

    #[tokio::test]
    async fn test_cold_user_gets_empty_list() {
        let oracle = ContentBasedOracle::new(catalog());
        oracle.fit().unwrap();

        let items = oracle.predict(7, 10, true, &[]).await.unwrap();
        assert!(items.is_empty());
    }
}
