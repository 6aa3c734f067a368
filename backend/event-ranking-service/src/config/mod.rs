use crate::error::{AppError, Result};
use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub index: IndexConfig,
    pub recommendation: RecommendationConfig,
    pub batch: BatchConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub service_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

/// Index build parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct IndexConfig {
    /// Vocabulary cap for the TF-IDF model
    pub max_features: usize,
    /// Number of random-projection trees in the ANN forest
    pub num_trees: usize,
    /// Similarity edges kept per candidate
    pub top_k_edges: usize,
    /// Weight applied to the target's engagement score on each edge
    pub engagement_boost_weight: f64,
    /// Rows per bulk insert into the edge table
    pub edge_insert_batch: usize,
    /// TTL of the cached current snapshot
    pub snapshot_ttl_secs: u64,
    /// Fixed seed for tree construction; random when unset
    pub seed: Option<u64>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            max_features: 1000,
            num_trees: 10,
            top_k_edges: 10,
            engagement_boost_weight: 0.5,
            edge_insert_batch: 1000,
            snapshot_ttl_secs: 3600,
            seed: None,
        }
    }
}

impl IndexConfig {
    pub fn snapshot_ttl(&self) -> Duration {
        Duration::from_secs(self.snapshot_ttl_secs)
    }
}

/// Hybrid scorer parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct RecommendationConfig {
    pub target_len: usize,
    pub cache_ttl_secs: u64,
    pub max_per_owner: usize,
    /// Per-owner cap only applies while fewer than this many slots are filled
    pub relax_below: usize,
    pub seed_live: usize,
    /// Upper bound on live entries as a share of `target_len`
    pub live_share: f64,
    /// Reminder-list entries used as similarity seeds
    pub similarity_seeds: usize,
    pub result_cache_enabled: bool,
}

impl Default for RecommendationConfig {
    fn default() -> Self {
        Self {
            target_len: 50,
            cache_ttl_secs: 300,
            max_per_owner: 3,
            relax_below: 40,
            seed_live: 3,
            live_share: 0.3,
            similarity_seeds: 5,
            result_cache_enabled: true,
        }
    }
}

impl RecommendationConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Maximum number of live entries in an assembled list
    pub fn max_live(&self) -> usize {
        (self.live_share * self.target_len as f64).floor() as usize
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    pub run_once: bool,
    pub interval_secs: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            run_once: true,
            interval_secs: 3600,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let index_defaults = IndexConfig::default();
        let rec_defaults = RecommendationConfig::default();
        let batch_defaults = BatchConfig::default();

        Ok(Config {
            service: ServiceConfig {
                service_name: env::var("SERVICE_NAME")
                    .unwrap_or_else(|_| "event-ranking-service".to_string()),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").map_err(|_| {
                    AppError::Configuration("DATABASE_URL must be set".to_string())
                })?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 10)?,
            },
            redis: RedisConfig {
                url: env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            },
            index: IndexConfig {
                max_features: parse_env("INDEX_MAX_FEATURES", index_defaults.max_features)?,
                num_trees: parse_env("INDEX_NUM_TREES", index_defaults.num_trees)?,
                top_k_edges: parse_env("INDEX_TOP_K_EDGES", index_defaults.top_k_edges)?,
                engagement_boost_weight: parse_env(
                    "INDEX_ENGAGEMENT_BOOST_WEIGHT",
                    index_defaults.engagement_boost_weight,
                )?,
                edge_insert_batch: parse_env(
                    "INDEX_EDGE_INSERT_BATCH",
                    index_defaults.edge_insert_batch,
                )?,
                snapshot_ttl_secs: parse_env(
                    "INDEX_SNAPSHOT_TTL_SECS",
                    index_defaults.snapshot_ttl_secs,
                )?,
                seed: parse_optional_env("INDEX_SEED")?,
            },
            recommendation: RecommendationConfig {
                target_len: parse_env("RECOMMEND_TARGET_LEN", rec_defaults.target_len)?,
                cache_ttl_secs: parse_env("RECOMMEND_CACHE_TTL_SECS", rec_defaults.cache_ttl_secs)?,
                max_per_owner: parse_env("RECOMMEND_MAX_PER_OWNER", rec_defaults.max_per_owner)?,
                relax_below: parse_env("RECOMMEND_RELAX_BELOW", rec_defaults.relax_below)?,
                seed_live: parse_env("RECOMMEND_SEED_LIVE", rec_defaults.seed_live)?,
                live_share: parse_env("RECOMMEND_LIVE_SHARE", rec_defaults.live_share)?,
                similarity_seeds: parse_env(
                    "RECOMMEND_SIMILARITY_SEEDS",
                    rec_defaults.similarity_seeds,
                )?,
                result_cache_enabled: parse_env(
                    "RECOMMEND_RESULT_CACHE",
                    rec_defaults.result_cache_enabled,
                )?,
            },
            batch: BatchConfig {
                run_once: parse_env("REBUILD_RUN_ONCE", batch_defaults.run_once)?,
                interval_secs: parse_env("REBUILD_INTERVAL_SECS", batch_defaults.interval_secs)?,
            },
        })
    }
}

fn parse_env<T: FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| {
            AppError::Configuration(format!("{} has an invalid value: {}", key, raw))
        }),
        Err(_) => Ok(default),
    }
}

fn parse_optional_env<T: FromStr>(key: &str) -> Result<Option<T>> {
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| AppError::Configuration(format!("{} has an invalid value: {}", key, raw))),
        _ => Ok(None),
    }
}
