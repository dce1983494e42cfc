//! Learned re-ranking stage.
//!
//! Assembles a 9-feature vector per (user, candidate) pair, runs the
//! trained classifier, and orders candidates by predicted probability of a
//! positive interaction. Ranking never hard-fails the request path: with no
//! model, or on any feature/scoring error, candidates fall back to their
//! retrieval-time `initial_score` ordering.

use crate::error::{AppError, Result};
use crate::models::{Candidate, ItemRatingStats, RankedCandidate, UserRatingStats};
use crate::store::ItemCatalog;
use chrono::{Datelike, Timelike, Utc, Weekday};
use ndarray::Array2;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Midpoint of the rating scale, used when user/item statistics are missing.
pub const NEUTRAL_RATING: f64 = 3.5;

const DEFAULT_RELEASE_YEAR: i32 = 2000;
pub const FEATURE_COUNT: usize = 9;

/// Serving handle for a trained binary classifier. The output probability
/// of "positive interaction" becomes the candidate's final score.
pub trait RankingModel: Send + Sync {
    fn version(&self) -> &str;

    /// Score a feature matrix of shape (candidates, FEATURE_COUNT).
    fn predict(&self, features: Array2<f32>) -> Result<Vec<f32>>;
}

/// Logistic scorer over the standard feature layout, loadable from a JSON
/// weights file produced by offline training.
pub struct LinearRankingModel {
    weights: Vec<f32>,
    bias: f32,
    version: String,
}

#[derive(Deserialize)]
struct ModelFile {
    weights: Vec<f32>,
    bias: f32,
    #[serde(default = "default_model_version")]
    version: String,
}

fn default_model_version() -> String {
    "ranker_v1.0".to_string()
}

impl LinearRankingModel {
    pub fn new(weights: Vec<f32>, bias: f32) -> Self {
        Self {
            weights,
            bias,
            version: default_model_version(),
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let file: ModelFile = serde_json::from_str(&raw)?;
        if file.weights.len() != FEATURE_COUNT {
            return Err(AppError::Configuration(format!(
                "ranker model expects {} weights, found {}",
                FEATURE_COUNT,
                file.weights.len()
            )));
        }
        Ok(Self {
            weights: file.weights,
            bias: file.bias,
            version: file.version,
        })
    }
}

impl RankingModel for LinearRankingModel {
    fn version(&self) -> &str {
        &self.version
    }

    fn predict(&self, features: Array2<f32>) -> Result<Vec<f32>> {
        if features.ncols() != self.weights.len() {
            return Err(AppError::Internal(format!(
                "feature matrix has {} columns, model expects {}",
                features.ncols(),
                self.weights.len()
            )));
        }

        Ok(features
            .outer_iter()
            .map(|row| {
                let z: f32 = row
                    .iter()
                    .zip(&self.weights)
                    .map(|(x, w)| x * w)
                    .sum::<f32>()
                    + self.bias;
                1.0 / (1.0 + (-z).exp())
            })
            .collect())
    }
}

pub struct Ranker {
    catalog: Arc<ItemCatalog>,
    model: Option<Arc<dyn RankingModel>>,
}

impl Ranker {
    pub fn new(catalog: Arc<ItemCatalog>) -> Self {
        Self {
            catalog,
            model: None,
        }
    }

    pub fn with_model(catalog: Arc<ItemCatalog>, model: Arc<dyn RankingModel>) -> Self {
        Self {
            catalog,
            model: Some(model),
        }
    }

    pub fn has_model(&self) -> bool {
        self.model.is_some()
    }

    /// Re-rank candidates for a user, descending by final score.
    pub fn predict(
        &self,
        user_id: i64,
        candidates: Vec<Candidate>,
        user_stats: Option<&UserRatingStats>,
        item_stats: &HashMap<i64, ItemRatingStats>,
    ) -> Vec<RankedCandidate> {
        if candidates.is_empty() {
            return Vec::new();
        }

        let Some(model) = &self.model else {
            return Self::initial_score_order(candidates);
        };

        match self.score(model.as_ref(), &candidates, user_stats, item_stats) {
            Ok(scores) => {
                let mut ranked: Vec<RankedCandidate> = candidates
                    .into_iter()
                    .zip(scores)
                    .map(|(candidate, score)| {
                        RankedCandidate::from_candidate(candidate, score as f64)
                    })
                    .collect();
                ranked.sort_by(|a, b| {
                    b.final_score
                        .partial_cmp(&a.final_score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                debug!(user_id, count = ranked.len(), "Candidates re-ranked");
                ranked
            }
            Err(e) => {
                warn!("Ranking failed, falling back to initial scores: {}", e);
                Self::initial_score_order(candidates)
            }
        }
    }

    fn score(
        &self,
        model: &dyn RankingModel,
        candidates: &[Candidate],
        user_stats: Option<&UserRatingStats>,
        item_stats: &HashMap<i64, ItemRatingStats>,
    ) -> Result<Vec<f32>> {
        let now = Utc::now();
        let hour_of_day = now.hour() as f32;
        let is_weekend = matches!(now.weekday(), Weekday::Sat | Weekday::Sun);

        let (user_avg, user_count) = match user_stats {
            Some(stats) => (stats.avg_rating as f32, stats.rating_count as f32),
            None => (NEUTRAL_RATING as f32, 0.0),
        };

        let flat: Vec<f32> = candidates
            .iter()
            .flat_map(|candidate| {
                let (item_avg, item_count) = match item_stats.get(&candidate.item_id) {
                    Some(stats) => (stats.avg_rating as f32, stats.rating_count as f32),
                    None => (NEUTRAL_RATING as f32, 0.0),
                };
                let release_year = self
                    .catalog
                    .release_year_of(candidate.item_id)
                    .unwrap_or(DEFAULT_RELEASE_YEAR) as f32;

                [
                    user_avg,
                    user_count,
                    item_avg,
                    item_count,
                    release_year,
                    candidate.initial_score as f32,
                    candidate.source.weight(),
                    hour_of_day,
                    if is_weekend { 1.0 } else { 0.0 },
                ]
            })
            .collect();

        let matrix = Array2::from_shape_vec((candidates.len(), FEATURE_COUNT), flat)
            .map_err(|e| AppError::Internal(format!("failed to build feature matrix: {}", e)))?;

        model.predict(matrix)
    }

    /// Fallback ordering: descending retrieval-time score, no contribution.
    fn initial_score_order(candidates: Vec<Candidate>) -> Vec<RankedCandidate> {
        let mut ranked: Vec<RankedCandidate> = candidates
            .into_iter()
            .map(|candidate| {
                let score = candidate.initial_score;
                RankedCandidate::from_candidate(candidate, score)
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.initial_score
                .partial_cmp(&a.initial_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CandidateSource;
    use std::io::Write;

    fn candidate(item_id: i64, initial_score: f64, source: CandidateSource) -> Candidate {
        Candidate {
            item_id,
            title: format!("Item {}", item_id),
            genres: vec![],
            initial_score,
            source,
            reason: "test".to_string(),
        }
    }

    #[test]
    fn test_no_model_orders_by_initial_score() {
        let ranker = Ranker::new(Arc::new(ItemCatalog::new()));
        let candidates = vec![
            candidate(1, 0.2, CandidateSource::Popularity),
            candidate(2, 0.9, CandidateSource::Collaborative),
            candidate(3, 0.5, CandidateSource::ContentBased),
        ];

        let ranked = ranker.predict(1, candidates, None, &HashMap::new());
        let order: Vec<i64> = ranked.iter().map(|r| r.item_id).collect();
        assert_eq!(order, vec![2, 3, 1]);
        assert!(ranked.iter().all(|r| r.ranker_contribution == 0.0));
    }

    #[test]
    fn test_model_scores_and_contribution() {
        // Only the initial-score feature carries weight, so the model
        // preserves retrieval order while producing sigmoid outputs.
        let mut weights = vec![0.0; FEATURE_COUNT];
        weights[5] = 4.0;
        let model = Arc::new(LinearRankingModel::new(weights, -1.0));
        let ranker = Ranker::with_model(Arc::new(ItemCatalog::new()), model);

        let candidates = vec![
            candidate(1, 0.1, CandidateSource::Popularity),
            candidate(2, 0.9, CandidateSource::Collaborative),
        ];
        let ranked = ranker.predict(1, candidates, None, &HashMap::new());

        assert_eq!(ranked[0].item_id, 2);
        assert!(ranked[0].final_score > 0.5);
        assert!(ranked[1].final_score < 0.5);
        for item in &ranked {
            assert!(
                (item.ranker_contribution - (item.final_score - item.initial_score)).abs()
                    < 1e-9
            );
        }
    }

    #[test]
    fn test_model_error_falls_back() {
        struct BrokenModel;
        impl RankingModel for BrokenModel {
            fn version(&self) -> &str {
                "broken"
            }
            fn predict(&self, _features: Array2<f32>) -> Result<Vec<f32>> {
                Err(AppError::ModelUnavailable("not loaded".to_string()))
            }
        }

        let ranker = Ranker::with_model(Arc::new(ItemCatalog::new()), Arc::new(BrokenModel));
        let candidates = vec![
            candidate(1, 0.3, CandidateSource::Popularity),
            candidate(2, 0.8, CandidateSource::Collaborative),
        ];

        let ranked = ranker.predict(1, candidates, None, &HashMap::new());
        assert_eq!(ranked[0].item_id, 2);
    }

    #[test]
    fn test_load_model_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"weights": [0.1, 0.0, 0.2, 0.0, 0.0, 1.0, 0.3, 0.0, 0.0], "bias": -0.5}}"#
        )
        .unwrap();

        let model = LinearRankingModel::load(file.path()).unwrap();
        assert_eq!(model.version(), "ranker_v1.0");

        let bad = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(bad.path(), r#"{"weights": [1.0], "bias": 0.0}"#).unwrap();
        assert!(LinearRankingModel::load(bad.path()).is_err());
    }
}
