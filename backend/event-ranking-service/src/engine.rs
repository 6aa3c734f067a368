//! Wiring of the batch job and the online services behind one handle

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::jobs::{IndexRebuildJob, RebuildOutcome};
use crate::models::{EventId, RankedEvent, SimilarNeighbors, ViewerContext, ViewerId};
use crate::services::{
    CandidateSource, HybridScorer, Jitter, KvCache, PostgresCandidateSource,
    PostgresSnapshotStore, PostgresViewerSource, RedisCache, SimilarityService, SnapshotStore,
    ViewerSource,
};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;

const REDIS_KEY_PREFIX: &str = "event_ranking:";

pub struct EventRankingEngine {
    rebuild_job: IndexRebuildJob,
    similarity: Arc<SimilarityService>,
    scorer: HybridScorer,
}

impl EventRankingEngine {
    /// Build from explicitly provided collaborators
    pub fn new(
        config: &Config,
        candidates: Arc<dyn CandidateSource>,
        viewers: Arc<dyn ViewerSource>,
        store: Arc<dyn SnapshotStore>,
        cache: Arc<dyn KvCache>,
    ) -> Self {
        let similarity = Arc::new(SimilarityService::new(
            Arc::clone(&store),
            Arc::clone(&cache),
            config.index.snapshot_ttl(),
        ));

        let scorer = HybridScorer::new(
            Arc::clone(&candidates),
            viewers,
            Arc::clone(&similarity),
            Arc::clone(&cache),
            config.recommendation.clone(),
        );

        let rebuild_job = IndexRebuildJob::new(
            candidates,
            store,
            cache,
            config.index.clone(),
            config.batch.clone(),
        );

        Self {
            rebuild_job,
            similarity,
            scorer,
        }
    }

    /// Build against Postgres and Redis
    pub async fn connect(config: &Config) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.database.max_connections)
            .connect(&config.database.url)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to database: {}", e)))?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| AppError::Database(format!("Migration failed: {}", e)))?;

        let cache = RedisCache::connect(&config.redis.url, REDIS_KEY_PREFIX).await?;
        info!(
            max_connections = config.database.max_connections,
            "Connected to Postgres and Redis"
        );

        Ok(Self::from_pool(config, pool, Arc::new(cache)))
    }

    pub fn from_pool(config: &Config, pool: PgPool, cache: Arc<dyn KvCache>) -> Self {
        Self::new(
            config,
            Arc::new(PostgresCandidateSource::new(pool.clone())),
            Arc::new(PostgresViewerSource::new(pool.clone())),
            Arc::new(PostgresSnapshotStore::new(pool, config.index.edge_insert_batch)),
            cache,
        )
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.scorer = self.scorer.with_jitter(jitter);
        self
    }

    /// Run the index builder once
    pub async fn trigger_batch_rebuild(&self) -> RebuildOutcome {
        self.rebuild_job.trigger_batch_rebuild().await
    }

    /// Run the index builder once or on its schedule, per batch config
    pub async fn run_rebuild_schedule(&self) -> RebuildOutcome {
        self.rebuild_job.run().await
    }

    pub async fn lookup_similar(&self, event_id: EventId, k: usize) -> Vec<(EventId, f64)> {
        self.similarity.lookup_similar(event_id, k).await
    }

    /// Same as `lookup_similar`, tagged with the serving path
    pub async fn lookup(&self, event_id: EventId, k: usize) -> SimilarNeighbors {
        self.similarity.lookup(event_id, k).await
    }

    pub async fn recommend(
        &self,
        viewer_id: ViewerId,
        interest: Option<&str>,
        now: DateTime<Utc>,
    ) -> Vec<RankedEvent> {
        self.scorer.recommend(viewer_id, interest, now).await
    }

    pub async fn recommend_for(
        &self,
        viewer: &ViewerContext,
        interest: Option<&str>,
        now: DateTime<Utc>,
    ) -> Vec<RankedEvent> {
        self.scorer.recommend_for(viewer, interest, now).await
    }

    pub async fn trending(&self, interest: Option<&str>, now: DateTime<Utc>) -> Vec<RankedEvent> {
        self.scorer.trending(interest, now).await
    }
}
