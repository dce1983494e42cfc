//! Online learning: buffered feedback and incremental model refresh.
//!
//! Feedback accumulates in a shared buffer; a refresh fires when the buffer
//! reaches capacity or when enough wall-clock time has passed since the
//! last update (the time trigger only arms after a first drain). The drain
//! itself is an atomic take-and-clear; model refits run on the drained copy
//! so concurrent `add_feedback` calls land in the fresh buffer, never lost
//! and never double-counted.

use crate::config::OnlineLearningSettings;
use crate::metrics;
use crate::models::FeedbackEntry;
use crate::services::scoring::ModelRegistry;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info};

/// Upper bound for one model family's refit inside a refresh cycle; a
/// timeout counts as that model's failure and never blocks the others.
const REFIT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct OnlineLearnerConfig {
    pub buffer_capacity: usize,
    pub auto_update: bool,
    pub update_interval: Duration,
}

impl Default for OnlineLearnerConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 10,
            auto_update: true,
            update_interval: Duration::from_secs(3600),
        }
    }
}

impl From<&OnlineLearningSettings> for OnlineLearnerConfig {
    fn from(settings: &OnlineLearningSettings) -> Self {
        Self {
            buffer_capacity: settings.buffer_capacity,
            auto_update: settings.auto_update,
            update_interval: Duration::from_secs(settings.update_interval_secs),
        }
    }
}

/// Returned by `add_feedback` so the caller can decide to signal a refresh.
#[derive(Debug, Clone)]
pub struct FeedbackStatus {
    pub buffer_size: usize,
    pub should_update: bool,
    pub reason: Option<String>,
    pub total_processed: u64,
}

/// Outcome of one refresh cycle.
#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    pub updated: bool,
    pub models_updated: Vec<String>,
    pub feedback_count: usize,
    pub update_time_seconds: f64,
    pub total_updates: u64,
}

impl UpdateOutcome {
    fn skipped(total_updates: u64) -> Self {
        Self {
            updated: false,
            models_updated: Vec::new(),
            feedback_count: 0,
            update_time_seconds: 0.0,
            total_updates,
        }
    }
}

/// Learner state snapshot.
#[derive(Debug, Clone)]
pub struct LearnerStats {
    pub buffer_size: usize,
    pub buffer_capacity: usize,
    pub total_processed: u64,
    pub update_count: u64,
    pub last_update: Option<DateTime<Utc>>,
    pub auto_update: bool,
}

pub struct OnlineLearner {
    config: OnlineLearnerConfig,
    buffer: Mutex<Vec<FeedbackEntry>>,
    last_update: Mutex<Option<DateTime<Utc>>>,
    update_count: AtomicU64,
    total_processed: AtomicU64,
}

impl OnlineLearner {
    pub fn new(config: OnlineLearnerConfig) -> Self {
        info!(
            buffer_capacity = config.buffer_capacity,
            auto_update = config.auto_update,
            "Online learner initialized"
        );
        Self {
            config,
            buffer: Mutex::new(Vec::new()),
            last_update: Mutex::new(None),
            update_count: AtomicU64::new(0),
            total_processed: AtomicU64::new(0),
        }
    }

    /// Buffer one feedback event and report whether a refresh should fire.
    pub async fn add_feedback(
        &self,
        user_id: i64,
        item_id: i64,
        rating: f64,
        timestamp: Option<DateTime<Utc>>,
    ) -> FeedbackStatus {
        let entry = FeedbackEntry {
            user_id,
            item_id,
            rating,
            timestamp: timestamp.unwrap_or_else(Utc::now),
        };

        let buffer_size = {
            let mut buffer = self.buffer.lock().await;
            buffer.push(entry);
            buffer.len()
        };
        debug!(user_id, item_id, rating, buffer_size, "Feedback buffered");

        let mut should_update = false;
        let mut reason = None;

        if self.config.auto_update {
            if buffer_size >= self.config.buffer_capacity {
                should_update = true;
                reason = Some(format!(
                    "buffer capacity reached ({}/{})",
                    buffer_size, self.config.buffer_capacity
                ));
            } else if let Some(last) = *self.last_update.lock().await {
                let elapsed = Utc::now().signed_duration_since(last);
                let interval = chrono::Duration::from_std(self.config.update_interval)
                    .unwrap_or_else(|_| chrono::Duration::days(365_000));
                if elapsed >= interval {
                    should_update = true;
                    reason = Some(format!(
                        "update interval elapsed ({}s since last update)",
                        elapsed.num_seconds()
                    ));
                }
            }
        }

        FeedbackStatus {
            buffer_size,
            should_update,
            reason,
            total_processed: self.total_processed.load(Ordering::Relaxed),
        }
    }

    /// Drain the buffer and refresh every incrementally-updatable model.
    ///
    /// A no-op when the buffer is empty. The buffer is cleared and the last
    /// update time recorded even when individual model refits fail.
    pub async fn trigger_update(&self, registry: &ModelRegistry) -> UpdateOutcome {
        let batch = {
            let mut buffer = self.buffer.lock().await;
            if buffer.is_empty() {
                debug!("Feedback buffer empty, skipping update");
                return UpdateOutcome::skipped(self.update_count.load(Ordering::Relaxed));
            }
            std::mem::take(&mut *buffer)
        };

        let started = Instant::now();
        let mut models_updated = Vec::new();

        for (name, model) in registry.incremental_models() {
            match timeout(REFIT_TIMEOUT, model.apply_feedback(&batch)).await {
                Ok(Ok(())) => {
                    models_updated.push(name.to_string());
                    metrics::record_model_update(name, "success");
                }
                Ok(Err(e)) => {
                    error!("Online update failed for {}: {}", name, e);
                    metrics::record_model_update(name, "error");
                }
                Err(_) => {
                    error!("Online update for {} timed out", name);
                    metrics::record_model_update(name, "timeout");
                }
            }
        }

        self.total_processed
            .fetch_add(batch.len() as u64, Ordering::Relaxed);
        let total_updates = self.update_count.fetch_add(1, Ordering::Relaxed) + 1;
        *self.last_update.lock().await = Some(Utc::now());

        let elapsed = started.elapsed();
        metrics::observe_update_duration(elapsed);
        info!(
            models = ?models_updated,
            feedback = batch.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Online model refresh complete"
        );

        UpdateOutcome {
            updated: true,
            models_updated,
            feedback_count: batch.len(),
            update_time_seconds: elapsed.as_secs_f64(),
            total_updates,
        }
    }

    pub async fn stats(&self) -> LearnerStats {
        LearnerStats {
            buffer_size: self.buffer.lock().await.len(),
            buffer_capacity: self.config.buffer_capacity,
            total_processed: self.total_processed.load(Ordering::Relaxed),
            update_count: self.update_count.load(Ordering::Relaxed),
            last_update: *self.last_update.lock().await,
            auto_update: self.config.auto_update,
        }
    }
}

/// Background refresh worker: waits for a signal from the ingestion path
/// and runs the drain + refit cycle off the request path.
pub fn spawn_update_worker(
    learner: Arc<OnlineLearner>,
    registry: Arc<ModelRegistry>,
    signal: Arc<Notify>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            signal.notified().await;
            let outcome = learner.trigger_update(&registry).await;
            if outcome.updated {
                debug!(
                    models = ?outcome.models_updated,
                    feedback = outcome.feedback_count,
                    "Background refresh applied"
                );
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ItemCatalog, ItemMeta};

    fn registry() -> ModelRegistry {
        let catalog = Arc::new(ItemCatalog::new());
        catalog.upsert(ItemMeta {
            item_id: 1,
            title: "Item 1".to_string(),
            genres: vec!["drama".to_string()],
            release_year: Some(2005),
        });
        ModelRegistry::new(catalog)
    }

    fn learner(capacity: usize) -> OnlineLearner {
        OnlineLearner::new(OnlineLearnerConfig {
            buffer_capacity: capacity,
            auto_update: true,
            update_interval: Duration::from_secs(3600),
        })
    }

    #[tokio::test]
    async fn test_buffer_trigger_fires_at_capacity() {
        let learner = learner(5);

        for i in 0..4 {
            let status = learner.add_feedback(i, 100 + i, 4.0, None).await;
            assert!(!status.should_update, "call {} fired early", i);
        }

        let status = learner.add_feedback(99, 999, 5.0, None).await;
        assert_eq!(status.buffer_size, 5);
        assert!(status.should_update);
        assert!(status.reason.unwrap().contains("buffer capacity"));

        // Still armed on the next call past capacity.
        let status = learner.add_feedback(100, 1000, 3.0, None).await;
        assert!(status.should_update);
    }

    #[tokio::test]
    async fn test_time_trigger_only_arms_after_first_update() {
        let registry = registry();
        let learner = OnlineLearner::new(OnlineLearnerConfig {
            buffer_capacity: 100,
            auto_update: true,
            update_interval: Duration::from_secs(0),
        });

        // No prior update: elapsed-time trigger must stay silent.
        let status = learner.add_feedback(1, 1, 4.0, None).await;
        assert!(!status.should_update);

        learner.trigger_update(&registry).await;

        // After the first drain the zero-second interval fires immediately.
        let status = learner.add_feedback(2, 1, 4.0, None).await;
        assert!(status.should_update);
        assert!(status.reason.unwrap().contains("interval"));
    }

    #[tokio::test]
    async fn test_empty_buffer_update_is_noop() {
        let registry = registry();
        let learner = learner(5);

        let outcome = learner.trigger_update(&registry).await;
        assert!(!outcome.updated);
        assert_eq!(outcome.feedback_count, 0);
        assert!(learner.stats().await.last_update.is_none());
    }

    #[tokio::test]
    async fn test_update_drains_buffer_and_records_state() {
        let registry = registry();
        let learner = learner(3);

        for i in 0..3 {
            learner.add_feedback(1, 10 + i, 4.5, None).await;
        }
        let outcome = learner.trigger_update(&registry).await;

        assert!(outcome.updated);
        assert_eq!(outcome.feedback_count, 3);
        assert_eq!(outcome.total_updates, 1);
        assert!(outcome.models_updated.contains(&"collaborative".to_string()));
        assert!(outcome.models_updated.contains(&"hybrid".to_string()));

        let stats = learner.stats().await;
        assert_eq!(stats.buffer_size, 0);
        assert_eq!(stats.total_processed, 3);
        assert!(stats.last_update.is_some());

        // Feedback reached the models.
        assert_eq!(registry.popularity().rating_count(10), 1);
        assert!(registry.collaborative().window_len().await > 0);
    }

    #[tokio::test]
    async fn test_auto_update_disabled_never_triggers() {
        let learner = OnlineLearner::new(OnlineLearnerConfig {
            buffer_capacity: 1,
            auto_update: false,
            update_interval: Duration::from_secs(0),
        });

        let status = learner.add_feedback(1, 1, 5.0, None).await;
        assert!(!status.should_update);
    }
}
