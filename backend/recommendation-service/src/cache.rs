//! Two-tier caching layer for ranked recommendation lists.
//!
//! - Authoritative tier: Redis (optional; the service degrades to
//!   memory-only when unavailable)
//! - Fallback tier: bounded in-process map with insertion-order eviction
//!
//! Cache keys follow the pattern:
//! - rec:user:{user_id}:model:{model_type}:n:{n}
//!
//! Entry validity is always re-checked against `expires_at`, independent of
//! Redis' own TTL, so a store restart that loses TTL metadata cannot serve
//! stale lists. Caching is best-effort: every backend error degrades to a
//! miss and is never surfaced to the request path.

use crate::config::CacheSettings;
use crate::metrics;
use crate::models::{ModelKind, RankedCandidate};
use chrono::{DateTime, Duration, Utc};
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// A cached, ranked recommendation list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedRecommendations {
    pub recommendations: Vec<RankedCandidate>,
    pub cached_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub model_type: ModelKind,
    pub user_id: i64,
}

impl CachedRecommendations {
    fn is_valid(&self) -> bool {
        Utc::now() < self.expires_at
    }
}

/// Hit/miss counters, mirrored to prometheus.
#[derive(Default)]
pub struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheMetrics {
    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        metrics::record_cache_hit();
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        metrics::record_cache_miss();
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

/// Cache statistics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub redis_available: bool,
    pub memory_cache_size: usize,
    pub max_memory_cache_size: usize,
    pub default_ttl_secs: u64,
    pub hits: u64,
    pub misses: u64,
    pub total_requests: u64,
    pub hit_rate: f64,
}

struct MemoryTier {
    entries: HashMap<String, CachedRecommendations>,
    insertion_order: VecDeque<String>,
}

impl MemoryTier {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            insertion_order: VecDeque::new(),
        }
    }

    /// Insert with insertion-order eviction. Re-storing an existing key
    /// overwrites in place and does not refresh its eviction position.
    fn insert(&mut self, key: String, entry: CachedRecommendations, max_entries: usize) {
        if self.entries.contains_key(&key) {
            self.entries.insert(key, entry);
            return;
        }
        while self.entries.len() >= max_entries {
            // Keys evicted elsewhere may linger in the queue; keep popping
            // until one actually frees a slot.
            let Some(oldest) = self.insertion_order.pop_front() else {
                break;
            };
            self.entries.remove(&oldest);
        }
        self.insertion_order.push_back(key.clone());
        self.entries.insert(key, entry);
    }

    fn remove_user(&mut self, prefix: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.starts_with(prefix));
        self.insertion_order.retain(|key| !key.starts_with(prefix));
        before - self.entries.len()
    }
}

/// Recommendation cache over Redis with a bounded in-process fallback map.
pub struct RecommendationCache {
    redis: Option<ConnectionManager>,
    memory: Mutex<MemoryTier>,
    metrics: CacheMetrics,
    default_ttl_secs: u64,
    max_memory_entries: usize,
}

impl RecommendationCache {
    /// Connect to Redis if a URL is configured. A connection failure is
    /// logged and the cache runs memory-only.
    pub async fn connect(redis_url: Option<&str>, settings: &CacheSettings) -> Self {
        let redis = match redis_url {
            Some(url) => match Self::open_redis(url).await {
                Ok(manager) => {
                    info!("Recommendation cache connected to Redis");
                    Some(manager)
                }
                Err(e) => {
                    warn!("Redis unavailable, falling back to memory cache: {}", e);
                    None
                }
            },
            None => None,
        };

        Self {
            redis,
            memory: Mutex::new(MemoryTier::new()),
            metrics: CacheMetrics::default(),
            default_ttl_secs: settings.default_ttl_secs,
            max_memory_entries: settings.max_memory_entries,
        }
    }

    /// Memory-only cache, used in tests and when Redis is not configured.
    pub fn in_memory(settings: &CacheSettings) -> Self {
        Self {
            redis: None,
            memory: Mutex::new(MemoryTier::new()),
            metrics: CacheMetrics::default(),
            default_ttl_secs: settings.default_ttl_secs,
            max_memory_entries: settings.max_memory_entries,
        }
    }

    async fn open_redis(url: &str) -> redis::RedisResult<ConnectionManager> {
        let client = redis::Client::open(url)?;
        ConnectionManager::new(client).await
    }

    fn cache_key(user_id: i64, model_type: ModelKind, n: usize) -> String {
        format!("rec:user:{}:model:{}:n:{}", user_id, model_type.as_str(), n)
    }

    fn user_prefix(user_id: i64) -> String {
        format!("rec:user:{}:", user_id)
    }

    /// Get cached recommendations.
    ///
    /// Checks Redis first, then the fallback map. Any backend error is
    /// treated as a miss.
    pub async fn get(
        &self,
        user_id: i64,
        model_type: ModelKind,
        n: usize,
    ) -> Option<Vec<RankedCandidate>> {
        let key = Self::cache_key(user_id, model_type, n);

        if let Some(conn) = &self.redis {
            let mut conn = conn.clone();
            match redis::cmd("GET")
                .arg(&key)
                .query_async::<_, Option<String>>(&mut conn)
                .await
            {
                Ok(Some(json)) => match serde_json::from_str::<CachedRecommendations>(&json) {
                    Ok(entry) if entry.is_valid() => {
                        debug!("Cache hit (redis) for {}", key);
                        self.metrics.record_hit();
                        return Some(entry.recommendations);
                    }
                    Ok(_) => {
                        // Entry outlived its expires_at (e.g. store restart
                        // lost TTL metadata); drop it.
                        let _: Result<(), _> =
                            redis::cmd("DEL").arg(&key).query_async(&mut conn).await;
                    }
                    Err(e) => {
                        warn!("Cache deserialization failed for {}: {}", key, e);
                        let _: Result<(), _> =
                            redis::cmd("DEL").arg(&key).query_async(&mut conn).await;
                    }
                },
                Ok(None) => {}
                Err(e) => {
                    warn!("Redis GET failed for {}: {}", key, e);
                }
            }
        }

        let mut tier = self.memory.lock().await;
        let found = tier.entries.get(&key).map(|entry| {
            if entry.is_valid() {
                Some(entry.recommendations.clone())
            } else {
                None
            }
        });
        match found {
            Some(Some(recommendations)) => {
                drop(tier);
                debug!("Cache hit (memory) for {}", key);
                self.metrics.record_hit();
                return Some(recommendations);
            }
            Some(None) => {
                tier.entries.remove(&key);
                drop(tier);
            }
            None => drop(tier),
        }

        debug!("Cache miss for {}", key);
        self.metrics.record_miss();
        None
    }

    /// Cache a ranked recommendation list in both tiers.
    ///
    /// `expires_at = cached_at + ttl`; Redis additionally gets a native TTL
    /// via SETEX. Returns false only when the entry could not be encoded.
    pub async fn set(
        &self,
        user_id: i64,
        model_type: ModelKind,
        recommendations: &[RankedCandidate],
        n: usize,
        ttl_secs: Option<u64>,
    ) -> bool {
        let key = Self::cache_key(user_id, model_type, n);
        let ttl = ttl_secs.unwrap_or(self.default_ttl_secs);
        let cached_at = Utc::now();

        let entry = CachedRecommendations {
            recommendations: recommendations.to_vec(),
            cached_at,
            expires_at: cached_at + Duration::seconds(ttl as i64),
            model_type,
            user_id,
        };

        let json = match serde_json::to_string(&entry) {
            Ok(json) => json,
            Err(e) => {
                warn!("Cache serialization failed for {}: {}", key, e);
                return false;
            }
        };

        if let Some(conn) = &self.redis {
            let mut conn = conn.clone();
            if let Err(e) = redis::cmd("SETEX")
                .arg(&key)
                .arg(ttl)
                .arg(&json)
                .query_async::<_, ()>(&mut conn)
                .await
            {
                warn!("Redis SETEX failed for {}: {}", key, e);
            }
        }

        let mut tier = self.memory.lock().await;
        tier.insert(key.clone(), entry, self.max_memory_entries);
        drop(tier);

        debug!("Cached recommendations for {} with TTL={}s", key, ttl);
        true
    }

    /// Invalidate every cached list for a user, across all model types and
    /// requested counts.
    ///
    /// Uses SCAN instead of KEYS to avoid blocking Redis.
    pub async fn invalidate(&self, user_id: i64) -> bool {
        let pattern = format!("{}*", Self::user_prefix(user_id));
        let mut total_deleted = 0usize;

        if let Some(conn) = &self.redis {
            let mut conn = conn.clone();
            let mut cursor: u64 = 0;
            loop {
                let scanned: Result<(u64, Vec<String>), _> = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(&pattern)
                    .arg("COUNT")
                    .arg(100)
                    .query_async(&mut conn)
                    .await;

                let (next_cursor, keys) = match scanned {
                    Ok(result) => result,
                    Err(e) => {
                        warn!("Redis SCAN failed for {}: {}", pattern, e);
                        break;
                    }
                };

                if !keys.is_empty() {
                    match redis::cmd("DEL")
                        .arg(&keys)
                        .query_async::<_, ()>(&mut conn)
                        .await
                    {
                        Ok(()) => total_deleted += keys.len(),
                        Err(e) => warn!("Redis DEL failed: {}", e),
                    }
                }

                cursor = next_cursor;
                if cursor == 0 {
                    break;
                }
            }
        }

        let prefix = Self::user_prefix(user_id);
        let mut tier = self.memory.lock().await;
        total_deleted += tier.remove_user(&prefix);
        drop(tier);

        if total_deleted > 0 {
            debug!(
                "Invalidated {} cached lists for user {}",
                total_deleted, user_id
            );
        }

        true
    }

    /// Clear both tiers (maintenance/testing).
    pub async fn clear_all(&self) {
        if let Some(conn) = &self.redis {
            let mut conn = conn.clone();
            if let Err(e) = Self::clear_redis(&mut conn).await {
                warn!("Redis cache clear failed: {}", e);
            }
        }

        let mut tier = self.memory.lock().await;
        tier.entries.clear();
        tier.insertion_order.clear();
    }

    async fn clear_redis(conn: &mut ConnectionManager) -> redis::RedisResult<()> {
        let mut cursor: u64 = 0;
        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg("rec:user:*")
                .arg("COUNT")
                .arg(100)
                .query_async(conn)
                .await?;

            if !keys.is_empty() {
                redis::cmd("DEL").arg(&keys).query_async::<_, ()>(conn).await?;
            }

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }
        Ok(())
    }

    /// Cache performance snapshot.
    pub async fn stats(&self) -> CacheStats {
        let memory_cache_size = self.memory.lock().await.entries.len();
        let hits = self.metrics.hits();
        let misses = self.metrics.misses();
        let total_requests = hits + misses;
        let hit_rate = if total_requests == 0 {
            0.0
        } else {
            hits as f64 / total_requests as f64
        };

        CacheStats {
            redis_available: self.redis.is_some(),
            memory_cache_size,
            max_memory_cache_size: self.max_memory_entries,
            default_ttl_secs: self.default_ttl_secs,
            hits,
            misses,
            total_requests,
            hit_rate,
        }
    }
}
