//! Shared state stores: the event log, item catalog, per-item rating
//! aggregates, and per-user profiles.
//!
//! Durable persistence is out of scope; the event log is consumed through
//! the `EventStore` trait so the in-memory implementation can be swapped
//! for a real backend without touching the pipeline.

use crate::error::Result;
use crate::models::{Event, EventType, ItemRatingStats, UserProfile};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Append-only store of interaction events.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Persist one event. A failure here must abort ingestion before any
    /// profile mutation.
    async fn append(&self, event: Event) -> Result<()>;

    /// Recent events for a user, newest first.
    async fn events_for_user(&self, user_id: i64, limit: usize) -> Result<Vec<Event>>;

    /// Recent events for an item, newest first.
    async fn events_for_item(&self, item_id: i64, limit: usize) -> Result<Vec<Event>>;

    /// All rating events (with a rating value) for a user, in append order.
    async fn rating_events_for_user(&self, user_id: i64) -> Result<Vec<Event>>;

    /// Distinct item ids the user has interacted with, most recent first.
    async fn seen_items(&self, user_id: i64) -> Result<Vec<i64>>;

    async fn total_events(&self) -> usize;
}

/// In-process event log used when no durable backend is configured.
#[derive(Default)]
pub struct InMemoryEventStore {
    events: RwLock<Vec<Event>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, event: Event) -> Result<()> {
        self.events.write().await.push(event);
        Ok(())
    }

    async fn events_for_user(&self, user_id: i64, limit: usize) -> Result<Vec<Event>> {
        let events = self.events.read().await;
        let mut matched: Vec<Event> = events
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        matched.truncate(limit);
        Ok(matched)
    }

    async fn events_for_item(&self, item_id: i64, limit: usize) -> Result<Vec<Event>> {
        let events = self.events.read().await;
        let mut matched: Vec<Event> = events
            .iter()
            .filter(|e| e.item_id == item_id)
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        matched.truncate(limit);
        Ok(matched)
    }

    async fn rating_events_for_user(&self, user_id: i64) -> Result<Vec<Event>> {
        let events = self.events.read().await;
        Ok(events
            .iter()
            .filter(|e| {
                e.user_id == user_id && e.event_type == EventType::Rate && e.rating.is_some()
            })
            .cloned()
            .collect())
    }

    async fn seen_items(&self, user_id: i64) -> Result<Vec<i64>> {
        let events = self.events.read().await;
        let mut seen = HashSet::new();
        let mut items = Vec::new();
        for event in events.iter().rev() {
            if event.user_id == user_id && seen.insert(event.item_id) {
                items.push(event.item_id);
            }
        }
        Ok(items)
    }

    async fn total_events(&self) -> usize {
        self.events.read().await.len()
    }
}

/// Display metadata for a recommendable item.
#[derive(Debug, Clone)]
pub struct ItemMeta {
    pub item_id: i64,
    pub title: String,
    pub genres: Vec<String>,
    pub release_year: Option<i32>,
}

/// Concurrent item metadata catalog.
#[derive(Default)]
pub struct ItemCatalog {
    items: DashMap<i64, ItemMeta>,
}

impl ItemCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, item: ItemMeta) {
        self.items.insert(item.item_id, item);
    }

    pub fn get(&self, item_id: i64) -> Option<ItemMeta> {
        self.items.get(&item_id).map(|entry| entry.value().clone())
    }

    pub fn title_of(&self, item_id: i64) -> String {
        self.items
            .get(&item_id)
            .map(|entry| entry.value().title.clone())
            .unwrap_or_else(|| format!("Item {}", item_id))
    }

    pub fn genres_of(&self, item_id: i64) -> Vec<String> {
        self.items
            .get(&item_id)
            .map(|entry| entry.value().genres.clone())
            .unwrap_or_default()
    }

    pub fn release_year_of(&self, item_id: i64) -> Option<i32> {
        self.items
            .get(&item_id)
            .and_then(|entry| entry.value().release_year)
    }

    pub fn all_items(&self) -> Vec<ItemMeta> {
        self.items.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct ItemAgg {
    count: u64,
    sum: f64,
}

/// Running per-item rating aggregates, maintained by the ingestion path.
#[derive(Default)]
pub struct ItemStatsStore {
    stats: DashMap<i64, ItemAgg>,
}

impl ItemStatsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, item_id: i64, rating: f64) {
        let mut entry = self.stats.entry(item_id).or_default();
        entry.count += 1;
        entry.sum += rating;
    }

    pub fn get(&self, item_id: i64) -> Option<ItemRatingStats> {
        self.stats.get(&item_id).map(|agg| ItemRatingStats {
            avg_rating: agg.sum / agg.count as f64,
            rating_count: agg.count,
        })
    }

    pub fn snapshot_for(&self, item_ids: &[i64]) -> HashMap<i64, ItemRatingStats> {
        item_ids
            .iter()
            .filter_map(|id| self.get(*id).map(|stats| (*id, stats)))
            .collect()
    }
}

/// Per-user profiles with a per-user lock registry so concurrent events for
/// the same user serialize their read-modify-write, while different users
/// proceed in parallel.
#[derive(Default)]
pub struct ProfileStore {
    profiles: DashMap<i64, UserProfile>,
    locks: DashMap<i64, Arc<Mutex<()>>>,
}

impl ProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user_lock(&self, user_id: i64) -> Arc<Mutex<()>> {
        self.locks
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub fn get(&self, user_id: i64) -> Option<UserProfile> {
        self.profiles.get(&user_id).map(|entry| entry.value().clone())
    }

    pub fn insert(&self, profile: UserProfile) {
        self.profiles.insert(profile.user_id, profile);
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn event(user_id: i64, item_id: i64, event_type: EventType, rating: Option<f64>) -> Event {
        Event {
            event_id: Uuid::new_v4(),
            user_id,
            item_id,
            event_type,
            rating,
            timestamp: Utc::now(),
            session_id: None,
            source: "test".to_string(),
            metadata: serde_json::Map::new(),
        }
    }

    #[tokio::test]
    async fn test_seen_items_deduplicates() {
        let store = InMemoryEventStore::new();
        store
            .append(event(1, 10, EventType::View, None))
            .await
            .unwrap();
        store
            .append(event(1, 11, EventType::Click, None))
            .await
            .unwrap();
        store
            .append(event(1, 10, EventType::Rate, Some(4.0)))
            .await
            .unwrap();
        store
            .append(event(2, 99, EventType::View, None))
            .await
            .unwrap();

        let seen = store.seen_items(1).await.unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], 10); // most recent first
        assert!(seen.contains(&11));
    }

    #[tokio::test]
    async fn test_rating_events_filtered() {
        let store = InMemoryEventStore::new();
        store
            .append(event(1, 10, EventType::Rate, Some(4.0)))
            .await
            .unwrap();
        store
            .append(event(1, 11, EventType::View, None))
            .await
            .unwrap();
        store
            .append(event(1, 12, EventType::Rate, None))
            .await
            .unwrap();

        let ratings = store.rating_events_for_user(1).await.unwrap();
        assert_eq!(ratings.len(), 1);
        assert_eq!(ratings[0].item_id, 10);
    }

    #[test]
    fn test_item_stats_running_average() {
        let stats = ItemStatsStore::new();
        stats.record(7, 4.0);
        stats.record(7, 5.0);

        let item = stats.get(7).unwrap();
        assert_eq!(item.rating_count, 2);
        assert!((item.avg_rating - 4.5).abs() < 1e-9);
        assert!(stats.get(8).is_none());
    }

    #[test]
    fn test_catalog_fallback_title() {
        let catalog = ItemCatalog::new();
        catalog.upsert(ItemMeta {
            item_id: 1,
            title: "The Matrix".to_string(),
            genres: vec!["sci-fi".to_string()],
            release_year: Some(1999),
        });

        assert_eq!(catalog.title_of(1), "The Matrix");
        assert_eq!(catalog.title_of(2), "Item 2");
        assert_eq!(catalog.release_year_of(1), Some(1999));
    }
}
