//! Core entities of the serving pipeline: interaction events, user profiles,
//! candidates, and request/response shapes.
//!
//! Everything that crosses a component boundary is an explicit struct or
//! closed enum; optional data is `Option`, never a missing map key.

use crate::error::AppError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Interaction event types accepted by the ingestion boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    View,
    Click,
    Rate,
    Purchase,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::View => "view",
            EventType::Click => "click",
            EventType::Rate => "rate",
            EventType::Purchase => "purchase",
        }
    }

    pub const ALL: [EventType; 4] = [
        EventType::View,
        EventType::Click,
        EventType::Rate,
        EventType::Purchase,
    ];
}

impl std::str::FromStr for EventType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "view" => Ok(EventType::View),
            "click" => Ok(EventType::Click),
            "rate" => Ok(EventType::Rate),
            "purchase" => Ok(EventType::Purchase),
            other => Err(AppError::Validation(format!(
                "unknown event type: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable interaction event. Created once by the ingestion boundary,
/// retained for profile recomputation and online-learning replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: Uuid,
    pub user_id: i64,
    pub item_id: i64,
    pub event_type: EventType,
    pub rating: Option<f64>,
    pub timestamp: DateTime<Utc>,
    pub session_id: Option<String>,
    pub source: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// The JSON-shaped ingestion record. Required fields are optional here so
/// that missing-field validation is an explicit check with a typed error.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IncomingEvent {
    pub user_id: Option<i64>,
    pub item_id: Option<i64>,
    pub event_type: Option<String>,
    pub rating: Option<f64>,
    pub timestamp: Option<DateTime<Utc>>,
    pub session_id: Option<String>,
    pub source: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Per-user aggregate profile, created lazily on first event and updated
/// incrementally on every subsequent one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: i64,
    pub total_interactions: u64,
    pub total_ratings: u64,
    pub avg_rating: Option<f64>,
    pub first_interaction: DateTime<Utc>,
    pub last_interaction: DateTime<Utc>,
    pub most_active_hour: u32,
}

impl UserProfile {
    pub fn new(user_id: i64, first_interaction: DateTime<Utc>) -> Self {
        Self {
            user_id,
            total_interactions: 0,
            total_ratings: 0,
            avg_rating: None,
            first_interaction,
            last_interaction: first_interaction,
            most_active_hour: 0,
        }
    }
}

/// Retrieval channel that proposed a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateSource {
    Collaborative,
    ContentBased,
    Popularity,
}

impl CandidateSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateSource::Collaborative => "collaborative",
            CandidateSource::ContentBased => "content_based",
            CandidateSource::Popularity => "popularity",
        }
    }

    /// Trust weight of the retrieval channel, used as a ranking feature.
    pub fn weight(&self) -> f32 {
        match self {
            CandidateSource::Collaborative => 1.5,
            CandidateSource::ContentBased => 1.2,
            CandidateSource::Popularity => 0.8,
        }
    }
}

/// Ranked item returned by a scoring oracle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredItem {
    pub item_id: i64,
    pub title: String,
    pub score: f64,
    pub reason: String,
}

/// An item proposed for recommendation, before re-ranking. Ephemeral,
/// created per request and deduplicated by `item_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub item_id: i64,
    pub title: String,
    #[serde(default)]
    pub genres: Vec<String>,
    pub initial_score: f64,
    pub source: CandidateSource,
    pub reason: String,
}

/// A candidate with its learned final score. This is the cache-entry record
/// shape and the response item shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedCandidate {
    pub item_id: i64,
    pub title: String,
    #[serde(default)]
    pub genres: Vec<String>,
    pub source: CandidateSource,
    pub reason: String,
    pub initial_score: f64,
    pub final_score: f64,
    pub ranker_contribution: f64,
}

impl RankedCandidate {
    pub fn from_candidate(candidate: Candidate, final_score: f64) -> Self {
        let contribution = final_score - candidate.initial_score;
        Self {
            item_id: candidate.item_id,
            title: candidate.title,
            genres: candidate.genres,
            source: candidate.source,
            reason: candidate.reason,
            initial_score: candidate.initial_score,
            final_score,
            ranker_contribution: contribution,
        }
    }
}

/// Ranking strategies a request may ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Hybrid,
    Collaborative,
    ContentBased,
    Popularity,
}

impl ModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Hybrid => "hybrid",
            ModelKind::Collaborative => "collaborative",
            ModelKind::ContentBased => "content_based",
            ModelKind::Popularity => "popularity",
        }
    }

    /// Fallback resolution order when the requested model is not ready.
    pub const FALLBACK_CHAIN: [ModelKind; 4] = [
        ModelKind::Hybrid,
        ModelKind::ContentBased,
        ModelKind::Collaborative,
        ModelKind::Popularity,
    ];
}

impl Default for ModelKind {
    fn default() -> Self {
        ModelKind::Hybrid
    }
}

impl std::str::FromStr for ModelKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hybrid" => Ok(ModelKind::Hybrid),
            "collaborative" => Ok(ModelKind::Collaborative),
            "content_based" => Ok(ModelKind::ContentBased),
            "popularity" => Ok(ModelKind::Popularity),
            other => Err(AppError::Validation(format!(
                "unknown model type: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecommendationRequest {
    pub user_id: i64,
    #[serde(default = "default_n_recommendations")]
    pub n_recommendations: usize,
    #[serde(default = "default_exclude_seen")]
    pub exclude_seen: bool,
    #[serde(default)]
    pub model_type: ModelKind,
}

impl RecommendationRequest {
    pub fn new(user_id: i64) -> Self {
        Self {
            user_id,
            n_recommendations: default_n_recommendations(),
            exclude_seen: default_exclude_seen(),
            model_type: ModelKind::default(),
        }
    }

    pub fn with_model(mut self, model_type: ModelKind) -> Self {
        self.model_type = model_type;
        self
    }

    pub fn with_count(mut self, n: usize) -> Self {
        self.n_recommendations = n;
        self
    }
}

fn default_n_recommendations() -> usize {
    10
}

fn default_exclude_seen() -> bool {
    true
}

#[derive(Debug, Clone, Serialize)]
pub struct RecommendationResponse {
    pub user_id: i64,
    pub recommendations: Vec<RankedCandidate>,
    pub model_version: String,
    pub timestamp: DateTime<Utc>,
}

/// A buffered rating awaiting the next online model refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackEntry {
    pub user_id: i64,
    pub item_id: i64,
    pub rating: f64,
    pub timestamp: DateTime<Utc>,
}

/// Per-user rating aggregates used as ranking features.
#[derive(Debug, Clone, Copy)]
pub struct UserRatingStats {
    pub avg_rating: f64,
    pub rating_count: u64,
}

/// Per-item rating aggregates used as ranking features.
#[derive(Debug, Clone, Copy)]
pub struct ItemRatingStats {
    pub avg_rating: f64,
    pub rating_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_round_trip() {
        for event_type in EventType::ALL {
            let parsed: EventType = event_type.as_str().parse().unwrap();
            assert_eq!(parsed, event_type);
        }
        assert!("swipe".parse::<EventType>().is_err());
    }

    #[test]
    fn test_model_kind_parse() {
        assert_eq!("hybrid".parse::<ModelKind>().unwrap(), ModelKind::Hybrid);
        assert_eq!(
            "content_based".parse::<ModelKind>().unwrap(),
            ModelKind::ContentBased
        );
        assert!("neural".parse::<ModelKind>().is_err());
    }

    #[test]
    fn test_request_defaults() {
        let request: RecommendationRequest =
            serde_json::from_str(r#"{"user_id": 7}"#).unwrap();
        assert_eq!(request.n_recommendations, 10);
        assert!(request.exclude_seen);
        assert_eq!(request.model_type, ModelKind::Hybrid);
    }

    #[test]
    fn test_ranked_candidate_contribution() {
        let candidate = Candidate {
            item_id: 1,
            title: "Item 1".to_string(),
            genres: vec![],
            initial_score: 0.4,
            source: CandidateSource::Collaborative,
            reason: "collaborative_filtering".to_string(),
        };
        let ranked = RankedCandidate::from_candidate(candidate, 0.9);
        assert!((ranked.ranker_contribution - 0.5).abs() < 1e-9);
    }
}
