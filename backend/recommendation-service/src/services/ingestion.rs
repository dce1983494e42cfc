//! Interaction event ingestion.
//!
//! Validates incoming records, persists them, updates the user's aggregate
//! profile, invalidates that user's cached recommendation lists, and feeds
//! rating events to the online learner. A persistence failure aborts before
//! any profile mutation; a validation failure has no side effects at all.
//!
//! Profile updates for the same user serialize on a per-user lock so
//! concurrent events cannot lose counter increments; different users
//! proceed in parallel.

use crate::cache::RecommendationCache;
use crate::error::{AppError, Result};
use crate::metrics;
use crate::models::{Event, EventType, IncomingEvent, UserProfile};
use crate::services::online_learning::OnlineLearner;
use crate::store::{EventStore, ItemStatsStore, ProfileStore};
use chrono::{Timelike, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, warn};
use uuid::Uuid;

const DEFAULT_SOURCE: &str = "web";

/// Returned on successful ingestion.
#[derive(Debug, Clone)]
pub struct EventReceipt {
    pub event_id: Uuid,
}

/// Per-event-type accepted counters.
#[derive(Default)]
struct EventCounters {
    view: AtomicU64,
    click: AtomicU64,
    rate: AtomicU64,
    purchase: AtomicU64,
}

impl EventCounters {
    fn record(&self, event_type: EventType) {
        let counter = match event_type {
            EventType::View => &self.view,
            EventType::Click => &self.click,
            EventType::Rate => &self.rate,
            EventType::Purchase => &self.purchase,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn get(&self, event_type: EventType) -> u64 {
        match event_type {
            EventType::View => self.view.load(Ordering::Relaxed),
            EventType::Click => self.click.load(Ordering::Relaxed),
            EventType::Rate => self.rate.load(Ordering::Relaxed),
            EventType::Purchase => self.purchase.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of accepted-event counts by type.
#[derive(Debug, Clone, serde::Serialize)]
pub struct EventCountsSnapshot {
    pub view: u64,
    pub click: u64,
    pub rate: u64,
    pub purchase: u64,
}

pub struct EventIngestor {
    store: Arc<dyn EventStore>,
    profiles: Arc<ProfileStore>,
    item_stats: Arc<ItemStatsStore>,
    cache: Arc<RecommendationCache>,
    learner: Arc<OnlineLearner>,
    update_signal: Arc<Notify>,
    counters: EventCounters,
}

impl EventIngestor {
    pub fn new(
        store: Arc<dyn EventStore>,
        profiles: Arc<ProfileStore>,
        item_stats: Arc<ItemStatsStore>,
        cache: Arc<RecommendationCache>,
        learner: Arc<OnlineLearner>,
        update_signal: Arc<Notify>,
    ) -> Self {
        Self {
            store,
            profiles,
            item_stats,
            cache,
            learner,
            update_signal,
            counters: EventCounters::default(),
        }
    }

    /// Process one interaction event.
    ///
    /// Side-effect order on success: persist → profile update → cache
    /// invalidation → metrics → learner feedback (rating events only).
    pub async fn process_event(&self, incoming: IncomingEvent) -> Result<EventReceipt> {
        let event = Self::validate(incoming)?;

        // Persist first: a storage failure must leave no partial state.
        self.store.append(event.clone()).await?;

        self.update_profile(&event).await;

        if event.event_type == EventType::Rate {
            if let Some(rating) = event.rating {
                self.item_stats.record(event.item_id, rating);
            }
        }

        self.cache.invalidate(event.user_id).await;

        self.counters.record(event.event_type);
        metrics::record_event(event.event_type.as_str());

        if event.event_type == EventType::Rate {
            if let Some(rating) = event.rating {
                let status = self
                    .learner
                    .add_feedback(event.user_id, event.item_id, rating, Some(event.timestamp))
                    .await;
                if status.should_update {
                    debug!(reason = ?status.reason, "Signalling online update worker");
                    self.update_signal.notify_one();
                }
            }
        }

        debug!(
            event_id = %event.event_id,
            user_id = event.user_id,
            event_type = %event.event_type,
            "Event processed"
        );
        Ok(EventReceipt {
            event_id: event.event_id,
        })
    }

    fn validate(incoming: IncomingEvent) -> Result<Event> {
        let user_id = incoming
            .user_id
            .ok_or_else(|| AppError::Validation("missing required field: user_id".to_string()))?;
        let item_id = incoming
            .item_id
            .ok_or_else(|| AppError::Validation("missing required field: item_id".to_string()))?;
        let event_type: EventType = incoming
            .event_type
            .ok_or_else(|| {
                AppError::Validation("missing required field: event_type".to_string())
            })?
            .parse()?;

        Ok(Event {
            event_id: Uuid::new_v4(),
            user_id,
            item_id,
            event_type,
            rating: incoming.rating,
            timestamp: incoming.timestamp.unwrap_or_else(Utc::now),
            session_id: incoming.session_id,
            source: incoming
                .source
                .unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
            metadata: incoming.metadata,
        })
    }

    /// Increment profile counters; on rating events, recompute the average
    /// over all of the user's rating events (including this one).
    async fn update_profile(&self, event: &Event) {
        let lock = self.profiles.user_lock(event.user_id);
        let _guard = lock.lock().await;

        let mut profile = self
            .profiles
            .get(event.user_id)
            .unwrap_or_else(|| UserProfile::new(event.user_id, event.timestamp));

        profile.total_interactions += 1;
        profile.last_interaction = event.timestamp;
        profile.most_active_hour = event.timestamp.hour();

        if event.event_type == EventType::Rate && event.rating.is_some() {
            profile.total_ratings += 1;
            match self.store.rating_events_for_user(event.user_id).await {
                Ok(ratings) if !ratings.is_empty() => {
                    let sum: f64 = ratings.iter().filter_map(|e| e.rating).sum();
                    profile.avg_rating = Some(sum / ratings.len() as f64);
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(
                        "Failed to recompute avg rating for user {}: {}",
                        event.user_id, e
                    );
                }
            }
        }

        self.profiles.insert(profile);
    }

    /// Recent events for a user, newest first.
    pub async fn recent_events_for_user(&self, user_id: i64, limit: usize) -> Result<Vec<Event>> {
        self.store.events_for_user(user_id, limit).await
    }

    /// Recent events for an item, newest first.
    pub async fn recent_events_for_item(&self, item_id: i64, limit: usize) -> Result<Vec<Event>> {
        self.store.events_for_item(item_id, limit).await
    }

    /// Accepted-event counts by type since startup.
    pub fn event_counts(&self) -> EventCountsSnapshot {
        EventCountsSnapshot {
            view: self.counters.get(EventType::View),
            click: self.counters.get(EventType::Click),
            rate: self.counters.get(EventType::Rate),
            purchase: self.counters.get(EventType::Purchase),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheSettings;
    use crate::services::online_learning::OnlineLearnerConfig;
    use crate::store::{InMemoryEventStore, MockEventStore};

    fn incoming(user_id: i64, item_id: i64, event_type: &str) -> IncomingEvent {
        IncomingEvent {
            user_id: Some(user_id),
            item_id: Some(item_id),
            event_type: Some(event_type.to_string()),
            ..IncomingEvent::default()
        }
    }

    fn ingestor_with(store: Arc<dyn EventStore>) -> EventIngestor {
        EventIngestor::new(
            store,
            Arc::new(ProfileStore::new()),
            Arc::new(ItemStatsStore::new()),
            Arc::new(RecommendationCache::in_memory(&CacheSettings {
                default_ttl_secs: 3600,
                max_memory_entries: 100,
            })),
            Arc::new(OnlineLearner::new(OnlineLearnerConfig::default())),
            Arc::new(Notify::new()),
        )
    }

    #[tokio::test]
    async fn test_missing_fields_rejected_without_side_effects() {
        let store = Arc::new(InMemoryEventStore::new());
        let ingestor = ingestor_with(store.clone());

        let mut record = incoming(1, 2, "view");
        record.user_id = None;
        let result = ingestor.process_event(record).await;
        assert!(matches!(result, Err(AppError::Validation(_))));

        let mut record = incoming(1, 2, "view");
        record.event_type = None;
        assert!(ingestor.process_event(record).await.is_err());

        let record = incoming(1, 2, "teleport");
        assert!(ingestor.process_event(record).await.is_err());

        assert_eq!(store.total_events().await, 0);
        assert_eq!(ingestor.event_counts().view, 0);
    }

    #[tokio::test]
    async fn test_persistence_failure_leaves_profile_untouched() {
        let mut mock = MockEventStore::new();
        mock.expect_append()
            .returning(|_| Err(AppError::BackendUnavailable("event store down".to_string())));
        let ingestor = ingestor_with(Arc::new(mock));

        let result = ingestor.process_event(incoming(7, 1, "rate")).await;
        assert!(result.is_err());
        assert_eq!(ingestor.event_counts().rate, 0);
    }

    #[tokio::test]
    async fn test_rating_event_updates_profile_and_stats() {
        let store = Arc::new(InMemoryEventStore::new());
        let profiles = Arc::new(ProfileStore::new());
        let item_stats = Arc::new(ItemStatsStore::new());
        let ingestor = EventIngestor::new(
            store.clone(),
            profiles.clone(),
            item_stats.clone(),
            Arc::new(RecommendationCache::in_memory(&CacheSettings {
                default_ttl_secs: 3600,
                max_memory_entries: 100,
            })),
            Arc::new(OnlineLearner::new(OnlineLearnerConfig::default())),
            Arc::new(Notify::new()),
        );

        let mut first = incoming(42, 7, "rate");
        first.rating = Some(5.0);
        ingestor.process_event(first).await.unwrap();

        let mut second = incoming(42, 8, "rate");
        second.rating = Some(3.0);
        ingestor.process_event(second).await.unwrap();

        let profile = profiles.get(42).unwrap();
        assert_eq!(profile.total_interactions, 2);
        assert_eq!(profile.total_ratings, 2);
        assert!((profile.avg_rating.unwrap() - 4.0).abs() < 1e-9);

        let stats = item_stats.get(7).unwrap();
        assert_eq!(stats.rating_count, 1);
        assert_eq!(ingestor.event_counts().rate, 2);
    }

    #[tokio::test]
    async fn test_view_event_does_not_touch_rating_stats() {
        let store = Arc::new(InMemoryEventStore::new());
        let profiles = Arc::new(ProfileStore::new());
        let ingestor = EventIngestor::new(
            store,
            profiles.clone(),
            Arc::new(ItemStatsStore::new()),
            Arc::new(RecommendationCache::in_memory(&CacheSettings {
                default_ttl_secs: 3600,
                max_memory_entries: 100,
            })),
            Arc::new(OnlineLearner::new(OnlineLearnerConfig::default())),
            Arc::new(Notify::new()),
        );

        ingestor.process_event(incoming(1, 2, "view")).await.unwrap();

        let profile = profiles.get(1).unwrap();
        assert_eq!(profile.total_interactions, 1);
        assert_eq!(profile.total_ratings, 0);
        assert!(profile.avg_rating.is_none());
    }

    #[tokio::test]
    async fn test_rating_event_invalidates_user_cache() {
        let store = Arc::new(InMemoryEventStore::new());
        let cache = Arc::new(RecommendationCache::in_memory(&CacheSettings {
            default_ttl_secs: 3600,
            max_memory_entries: 100,
        }));
        let ingestor = EventIngestor::new(
            store,
            Arc::new(ProfileStore::new()),
            Arc::new(ItemStatsStore::new()),
            cache.clone(),
            Arc::new(OnlineLearner::new(OnlineLearnerConfig::default())),
            Arc::new(Notify::new()),
        );

        use crate::models::{CandidateSource, ModelKind, RankedCandidate};
        let recs = vec![RankedCandidate {
            item_id: 1,
            title: "Item 1".to_string(),
            genres: vec![],
            source: CandidateSource::Popularity,
            reason: "popularity".to_string(),
            initial_score: 0.5,
            final_score: 0.5,
            ranker_contribution: 0.0,
        }];
        cache.set(42, ModelKind::Hybrid, &recs, 1, None).await;
        cache.set(7, ModelKind::Hybrid, &recs, 1, None).await;

        ingestor.process_event(incoming(42, 2, "click")).await.unwrap();

        assert!(cache.get(42, ModelKind::Hybrid, 1).await.is_none());
        assert!(cache.get(7, ModelKind::Hybrid, 1).await.is_some());
    }
}
