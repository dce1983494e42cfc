//! Prometheus metrics for the serving pipeline.

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram, register_int_counter_vec, Histogram, IntCounterVec,
};
use std::time::Duration;

static CACHE_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "recommendation_cache_requests_total",
        "Cache lookups by result (hit/miss)",
        &["result"]
    )
    .expect("Failed to register cache requests metric")
});

static EVENTS_INGESTED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "ingested_events_total",
        "Interaction events accepted by the ingestion boundary",
        &["event_type"]
    )
    .expect("Failed to register ingested events metric")
});

static ORACLE_FAILURES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "candidate_oracle_failures_total",
        "Scoring oracle calls that failed or timed out during candidate generation",
        &["source"]
    )
    .expect("Failed to register oracle failures metric")
});

static MODEL_UPDATES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "online_model_updates_total",
        "Online model refresh attempts by model and status",
        &["model", "status"]
    )
    .expect("Failed to register model updates metric")
});

static UPDATE_DURATION_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "online_update_duration_seconds",
        "Duration of online model refresh cycles",
        vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0]
    )
    .expect("Failed to register update duration metric")
});

static RECOMMENDATIONS_SERVED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "recommendations_served_total",
        "Recommendation lists computed on cache miss, by serving model",
        &["model"]
    )
    .expect("Failed to register recommendations served metric")
});

/// Record a cache hit.
pub fn record_cache_hit() {
    CACHE_REQUESTS_TOTAL.with_label_values(&["hit"]).inc();
}

/// Record a cache miss.
pub fn record_cache_miss() {
    CACHE_REQUESTS_TOTAL.with_label_values(&["miss"]).inc();
}

/// Record an accepted event by type.
pub fn record_event(event_type: &str) {
    EVENTS_INGESTED_TOTAL
        .with_label_values(&[event_type])
        .inc();
}

/// Record a failed or timed-out oracle call.
pub fn record_oracle_failure(source: &str) {
    ORACLE_FAILURES_TOTAL.with_label_values(&[source]).inc();
}

/// Record an online refresh attempt outcome for one model family.
pub fn record_model_update(model: &str, status: &str) {
    MODEL_UPDATES_TOTAL
        .with_label_values(&[model, status])
        .inc();
}

/// Record how long a refresh cycle took.
pub fn observe_update_duration(duration: Duration) {
    UPDATE_DURATION_SECONDS.observe(duration.as_secs_f64());
}

/// Record which model served a freshly computed recommendation list.
pub fn record_recommendation_served(model: &str) {
    RECOMMENDATIONS_SERVED_TOTAL
        .with_label_values(&[model])
        .inc();
}
