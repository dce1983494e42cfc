use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub redis: RedisConfig,
    pub cache: CacheSettings,
    pub candidates: CandidateSettings,
    pub ranking: RankingSettings,
    pub online_learning: OnlineLearningSettings,
    pub experiments: ExperimentSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub env: String,
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Optional: when unset (or unreachable) the cache runs memory-only.
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    pub default_ttl_secs: u64,
    pub max_memory_entries: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateSettings {
    pub pool_size: usize,
    pub oracle_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingSettings {
    pub model_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnlineLearningSettings {
    pub buffer_capacity: usize,
    pub auto_update: bool,
    pub update_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentSettings {
    pub config_path: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Config {
            app: AppConfig {
                env: std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
                log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            },
            redis: RedisConfig {
                url: std::env::var("REDIS_URL").ok(),
            },
            cache: CacheSettings {
                default_ttl_secs: std::env::var("CACHE_DEFAULT_TTL_SECS")
                    .unwrap_or_else(|_| "3600".to_string())
                    .parse()?,
                max_memory_entries: std::env::var("CACHE_MAX_MEMORY_ENTRIES")
                    .unwrap_or_else(|_| "1000".to_string())
                    .parse()?,
            },
            candidates: CandidateSettings {
                pool_size: std::env::var("CANDIDATE_POOL_SIZE")
                    .unwrap_or_else(|_| "100".to_string())
                    .parse()?,
                oracle_timeout_ms: std::env::var("ORACLE_TIMEOUT_MS")
                    .unwrap_or_else(|_| "500".to_string())
                    .parse()?,
            },
            ranking: RankingSettings {
                model_path: std::env::var("RANKER_MODEL_PATH").ok(),
            },
            online_learning: OnlineLearningSettings {
                buffer_capacity: std::env::var("ONLINE_BUFFER_CAPACITY")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()?,
                auto_update: std::env::var("ONLINE_AUTO_UPDATE")
                    .unwrap_or_else(|_| "true".to_string())
                    .parse()?,
                update_interval_secs: std::env::var("ONLINE_UPDATE_INTERVAL_SECS")
                    .unwrap_or_else(|_| "3600".to_string())
                    .parse()?,
            },
            experiments: ExperimentSettings {
                config_path: std::env::var("EXPERIMENTS_CONFIG_PATH").ok(),
            },
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app: AppConfig {
                env: "development".to_string(),
                log_level: "info".to_string(),
            },
            redis: RedisConfig { url: None },
            cache: CacheSettings {
                default_ttl_secs: 3600,
                max_memory_entries: 1000,
            },
            candidates: CandidateSettings {
                pool_size: 100,
                oracle_timeout_ms: 500,
            },
            ranking: RankingSettings { model_path: None },
            online_learning: OnlineLearningSettings {
                buffer_capacity: 10,
                auto_update: true,
                update_interval_secs: 3600,
            },
            experiments: ExperimentSettings { config_path: None },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.cache.default_ttl_secs, 3600);
        assert_eq!(config.cache.max_memory_entries, 1000);
        assert_eq!(config.candidates.pool_size, 100);
        assert_eq!(config.online_learning.buffer_capacity, 10);
        assert!(config.online_learning.auto_update);
        assert!(config.redis.url.is_none());
    }
}
