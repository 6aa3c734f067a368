// ============================================
// Index Rebuild Job
// ============================================
//
// Single-writer batch run that replaces the published similarity data.
//
// Workflow:
// 1. Fetch candidates that have not started yet
// 2. Vectorize them (TF-IDF) and compute pairwise cosine similarity
// 3. Build the angular ANN forest and serialize it
// 4. Derive popularity/engagement scores and the top-K edges per candidate
// 5. Publish scores, snapshot and edges in one transaction
// 6. Drop the cached snapshot so lookups load the new one
//
// Fewer than two candidates skips the run and keeps the previous snapshot.
// Any other failure is logged with the run id; the next run starts fresh.

use crate::config::{BatchConfig, IndexConfig};
use crate::error::{AppError, Result};
use crate::models::{
    Candidate, DerivedScores, NewIndexSnapshot, PublishBatch, SimilarityEdge,
};
use crate::services::ann::AngularForest;
use crate::services::cache::KvCache;
use crate::services::similarity::{SNAPSHOT_CACHE_KEY, SNAPSHOT_ID_CACHE_KEY};
use crate::services::snapshot_store::SnapshotStore;
use crate::services::sources::CandidateSource;
use crate::services::vectorizer::{
    candidate_document, cosine_similarity_matrix, encode_feature_vector, TfidfVectorizer,
};
use crate::utils::days_until;
use chrono::{DateTime, Utc};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Wall-clock time of each compute stage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildTimings {
    pub vectorize_ms: u64,
    pub similarity_ms: u64,
    pub ann_ms: u64,
    pub edges_ms: u64,
}

/// Everything a run publishes, computed without I/O
#[derive(Debug, Clone)]
pub struct IndexArtifacts {
    pub batch: PublishBatch,
    pub vocabulary_size: usize,
    pub index_bytes: usize,
    pub timings: BuildTimings,
}

/// Statistics of one successful run
#[derive(Debug, Clone)]
pub struct RebuildStats {
    pub run_id: Uuid,
    pub snapshot_id: i64,
    pub candidates: usize,
    pub vocabulary_size: usize,
    pub edges_written: usize,
    pub index_bytes: usize,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub fetch_ms: u64,
    pub build: BuildTimings,
    pub publish_ms: u64,
    pub total_duration_ms: u64,
}

/// Result of `trigger_batch_rebuild`
#[derive(Debug, Clone)]
pub enum RebuildOutcome {
    /// New snapshot and edge table are live
    Published(RebuildStats),
    /// Too few candidates; the previous snapshot stays current
    Skipped { candidates: usize },
    /// Nothing was published
    Failed { candidates: usize, error: String },
}

impl RebuildOutcome {
    /// A skipped run is a clean abort, not a failure
    pub fn is_success(&self) -> bool {
        !matches!(self, RebuildOutcome::Failed { .. })
    }

    pub fn candidates(&self) -> usize {
        match self {
            RebuildOutcome::Published(stats) => stats.candidates,
            RebuildOutcome::Skipped { candidates } | RebuildOutcome::Failed { candidates, .. } => {
                *candidates
            }
        }
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// Vectorize, index and score a candidate set
pub fn build_index_artifacts(
    candidates: &[Candidate],
    config: &IndexConfig,
    now: DateTime<Utc>,
) -> Result<IndexArtifacts> {
    if candidates.len() < 2 {
        return Err(AppError::InsufficientData {
            found: candidates.len(),
        });
    }

    let mut timings = BuildTimings::default();

    let stage = Instant::now();
    let documents: Vec<String> = candidates.iter().map(candidate_document).collect();
    let mut vectorizer = TfidfVectorizer::new(config.max_features);
    let vectors = vectorizer.fit_transform(&documents)?;
    timings.vectorize_ms = elapsed_ms(stage);

    let stage = Instant::now();
    let similarity = cosine_similarity_matrix(&vectors);
    timings.similarity_ms = elapsed_ms(stage);

    let stage = Instant::now();
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let forest = AngularForest::build(&vectors, config.num_trees, &mut rng)?;
    let index_blob = forest.to_bytes()?;
    timings.ann_ms = elapsed_ms(stage);

    let stage = Instant::now();
    let engagement: Vec<f64> = candidates.iter().map(engagement_score).collect();
    let scores = derived_scores(candidates, &vectors, &engagement, now)?;
    let edges = top_k_edges(candidates, &similarity, &engagement, config);
    timings.edges_ms = elapsed_ms(stage);

    let index_bytes = index_blob.len();
    Ok(IndexArtifacts {
        batch: PublishBatch {
            scores,
            snapshot: NewIndexSnapshot {
                index_blob,
                event_ids: candidates.iter().map(|c| c.id).collect(),
                vector_size: vectors.ncols(),
                created_at: now,
            },
            edges,
        },
        vocabulary_size: vectorizer.vocabulary_size(),
        index_bytes,
        timings,
    })
}

/// Reminders per owner subscriber
fn engagement_score(candidate: &Candidate) -> f64 {
    candidate.reminder_count as f64 / candidate.owner_subscriber_count.max(1) as f64
}

/// Reminders discounted by fractional days until start
fn popularity_score(candidate: &Candidate, now: DateTime<Utc>) -> f64 {
    candidate.reminder_count as f64 / (1.0 + days_until(candidate.start_time, now))
}

fn derived_scores(
    candidates: &[Candidate],
    vectors: &Array2<f32>,
    engagement: &[f64],
    now: DateTime<Utc>,
) -> Result<Vec<DerivedScores>> {
    candidates
        .iter()
        .enumerate()
        .map(|(i, candidate)| {
            Ok(DerivedScores {
                event_id: candidate.id,
                popularity_score: popularity_score(candidate, now),
                engagement_score: engagement[i],
                feature_vector: encode_feature_vector(vectors.row(i))?,
                updated_at: now,
            })
        })
        .collect()
}

/// Directed edges to the `top_k` most similar other candidates
///
/// Ranking uses raw cosine similarity, ties going to the lower position.
/// The boost comes from the target's engagement, so `a -> b` and `b -> a`
/// can score differently.
fn top_k_edges(
    candidates: &[Candidate],
    similarity: &Array2<f32>,
    engagement: &[f64],
    config: &IndexConfig,
) -> Vec<SimilarityEdge> {
    let n = candidates.len();
    let mut edges = Vec::with_capacity(n * config.top_k_edges.min(n.saturating_sub(1)));

    for i in 0..n {
        let row = similarity.row(i);
        let mut others: Vec<usize> = (0..n).filter(|&j| j != i).collect();
        others.sort_by(|&a, &b| row[b].total_cmp(&row[a]).then_with(|| a.cmp(&b)));

        for j in others.into_iter().take(config.top_k_edges) {
            let similarity_score = f64::from(row[j]).clamp(0.0, 1.0);
            let engagement_boost = engagement[j] * config.engagement_boost_weight;
            edges.push(SimilarityEdge {
                source_id: candidates[i].id,
                target_id: candidates[j].id,
                similarity_score,
                engagement_boost,
                final_score: similarity_score + engagement_boost,
            });
        }
    }

    edges
}

/// Index rebuild job runner
pub struct IndexRebuildJob {
    candidates: Arc<dyn CandidateSource>,
    store: Arc<dyn SnapshotStore>,
    cache: Arc<dyn KvCache>,
    index_config: IndexConfig,
    batch_config: BatchConfig,
    running: Mutex<()>,
}

impl IndexRebuildJob {
    pub fn new(
        candidates: Arc<dyn CandidateSource>,
        store: Arc<dyn SnapshotStore>,
        cache: Arc<dyn KvCache>,
        index_config: IndexConfig,
        batch_config: BatchConfig,
    ) -> Self {
        Self {
            candidates,
            store,
            cache,
            index_config,
            batch_config,
            running: Mutex::new(()),
        }
    }

    /// Run once, or keep running on the configured interval
    ///
    /// Returns the outcome of the last pass when configured to run once.
    pub async fn run(&self) -> RebuildOutcome {
        loop {
            let outcome = self.trigger_batch_rebuild().await;

            if self.batch_config.run_once {
                return outcome;
            }

            info!(
                interval_secs = self.batch_config.interval_secs,
                "Sleeping until next index rebuild"
            );
            sleep(Duration::from_secs(self.batch_config.interval_secs)).await;
        }
    }

    /// One rebuild pass; failures are logged and reported, never raised
    pub async fn trigger_batch_rebuild(&self) -> RebuildOutcome {
        let (candidates, result) = self.guarded_pass().await;
        match result {
            Ok(stats) => RebuildOutcome::Published(stats),
            Err(AppError::InsufficientData { found }) => {
                info!(candidates = found, "Not enough candidates to rebuild the index, keeping current snapshot");
                RebuildOutcome::Skipped { candidates: found }
            }
            Err(e) => RebuildOutcome::Failed {
                candidates,
                error: e.to_string(),
            },
        }
    }

    /// One rebuild pass with the error preserved
    pub async fn rebuild(&self) -> Result<RebuildStats> {
        self.guarded_pass().await.1
    }

    async fn guarded_pass(&self) -> (usize, Result<RebuildStats>) {
        let _guard = match self.running.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                warn!("Index rebuild requested while another run is in progress");
                return (
                    0,
                    Err(AppError::Build("rebuild already in progress".to_string())),
                );
            }
        };

        let run_id = Uuid::new_v4();
        let span = info_span!("index_rebuild", run_id = %run_id);
        self.run_pass(run_id).instrument(span).await
    }

    async fn run_pass(&self, run_id: Uuid) -> (usize, Result<RebuildStats>) {
        let started = Instant::now();
        let started_at = Utc::now();
        info!(
            num_trees = self.index_config.num_trees,
            top_k = self.index_config.top_k_edges,
            "Starting index rebuild"
        );

        let stage = Instant::now();
        let candidates = match self.candidates.indexable_candidates(started_at).await {
            Ok(candidates) => candidates,
            Err(e) => {
                error!(stage = "fetch", error = %e, "Index rebuild failed");
                return (0, Err(e));
            }
        };
        let fetch_ms = elapsed_ms(stage);
        let count = candidates.len();
        info!(candidates = count, duration_ms = fetch_ms, "Fetched candidates");

        if count < 2 {
            return (count, Err(AppError::InsufficientData { found: count }));
        }

        let index_config = self.index_config.clone();
        let artifacts = match tokio::task::spawn_blocking(move || {
            build_index_artifacts(&candidates, &index_config, started_at)
        })
        .await
        {
            Ok(Ok(artifacts)) => artifacts,
            Ok(Err(e)) => {
                error!(stage = "build", error = %e, "Index rebuild failed");
                return (count, Err(e));
            }
            Err(e) => {
                error!(stage = "build", error = %e, "Index build task aborted");
                return (count, Err(AppError::Internal(format!("build task failed: {}", e))));
            }
        };

        info!(
            vocabulary_size = artifacts.vocabulary_size,
            index_bytes = artifacts.index_bytes,
            edges = artifacts.batch.edges.len(),
            vectorize_ms = artifacts.timings.vectorize_ms,
            similarity_ms = artifacts.timings.similarity_ms,
            ann_ms = artifacts.timings.ann_ms,
            edges_ms = artifacts.timings.edges_ms,
            "Built index artifacts"
        );

        let edges_written = artifacts.batch.edges.len();
        let stage = Instant::now();
        let snapshot_id = match self.store.publish(artifacts.batch).await {
            Ok(id) => id,
            Err(e) => {
                error!(stage = "publish", error = %e, "Index rebuild failed, previous snapshot kept");
                return (count, Err(e));
            }
        };
        let publish_ms = elapsed_ms(stage);

        for key in [SNAPSHOT_ID_CACHE_KEY, SNAPSHOT_CACHE_KEY] {
            if let Err(e) = self.cache.delete(key).await {
                warn!(key = key, error = %e, "Failed to drop cached snapshot; it expires with its TTL");
            }
        }

        let stats = RebuildStats {
            run_id,
            snapshot_id,
            candidates: count,
            vocabulary_size: artifacts.vocabulary_size,
            edges_written,
            index_bytes: artifacts.index_bytes,
            started_at,
            completed_at: Utc::now(),
            fetch_ms,
            build: artifacts.timings,
            publish_ms,
            total_duration_ms: elapsed_ms(started),
        };

        info!(
            snapshot_id = stats.snapshot_id,
            candidates = stats.candidates,
            edges = stats.edges_written,
            publish_ms = stats.publish_ms,
            duration_ms = stats.total_duration_ms,
            "Index rebuild completed"
        );

        (count, Ok(stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EventStatus, Interest};
    use crate::services::cache::InMemoryCache;
    use crate::services::snapshot_store::InMemorySnapshotStore;
    use crate::services::sources::InMemoryCandidateSource;
    use chrono::Duration as ChronoDuration;

    fn candidate(id: i64, title: &str, owner: &str, reminders: i64, subscribers: i64) -> Candidate {
        Candidate {
            id,
            title: title.to_string(),
            description: String::new(),
            interests: vec![Interest {
                id: 1,
                name: "live".to_string(),
            }],
            owner_id: id * 10,
            owner_name: owner.to_string(),
            owner_subscriber_count: subscribers,
            start_time: Utc::now() + ChronoDuration::days(2),
            reminder_count: reminders,
            status: EventStatus::Scheduled,
        }
    }

    fn seeded_config() -> IndexConfig {
        IndexConfig {
            seed: Some(17),
            ..Default::default()
        }
    }

    fn corpus() -> Vec<Candidate> {
        vec![
            candidate(1, "Jazz Night", "owner_x", 10, 20),
            candidate(2, "Jazz Evening", "owner_x", 2, 20),
            candidate(3, "Football Match", "owner_y", 1, 0),
        ]
    }

    fn job(
        source: Vec<Candidate>,
        store: Arc<InMemorySnapshotStore>,
        cache: Arc<InMemoryCache>,
    ) -> IndexRebuildJob {
        IndexRebuildJob::new(
            Arc::new(InMemoryCandidateSource::new(source)),
            store,
            cache,
            seeded_config(),
            BatchConfig::default(),
        )
    }

    #[test]
    fn test_single_candidate_is_insufficient() {
        let err = build_index_artifacts(&corpus()[..1], &seeded_config(), Utc::now()).unwrap_err();
        assert!(matches!(err, AppError::InsufficientData { found: 1 }));
    }

    #[test]
    fn test_edges_exclude_self_and_rank_by_similarity() {
        let artifacts = build_index_artifacts(&corpus(), &seeded_config(), Utc::now()).unwrap();
        let edges = &artifacts.batch.edges;

        assert_eq!(edges.len(), 6);
        assert!(edges.iter().all(|e| e.source_id != e.target_id));

        let from_jazz: Vec<&SimilarityEdge> = edges.iter().filter(|e| e.source_id == 1).collect();
        assert_eq!(from_jazz[0].target_id, 2);
        assert!(from_jazz[0].similarity_score > from_jazz[1].similarity_score);
        assert!(edges
            .iter()
            .all(|e| (0.0..=1.0).contains(&e.similarity_score)));
    }

    #[test]
    fn test_edge_boost_uses_target_engagement() {
        let artifacts = build_index_artifacts(&corpus(), &seeded_config(), Utc::now()).unwrap();
        let edge = |s: i64, t: i64| {
            artifacts
                .batch
                .edges
                .iter()
                .find(|e| e.source_id == s && e.target_id == t)
                .cloned()
                .unwrap()
        };

        // engagement(1) = 10 / 20, engagement(3) = 1 / max(1, 0)
        assert!((edge(2, 1).engagement_boost - 0.25).abs() < 1e-9);
        assert!((edge(2, 3).engagement_boost - 0.5).abs() < 1e-9);
        let e = edge(1, 2);
        assert!((e.final_score - (e.similarity_score + e.engagement_boost)).abs() < 1e-12);
    }

    #[test]
    fn test_derived_scores() {
        let now = Utc::now();
        let artifacts = build_index_artifacts(&corpus(), &seeded_config(), now).unwrap();
        let jazz = &artifacts.batch.scores[0];

        assert_eq!(jazz.event_id, 1);
        assert!((jazz.engagement_score - 0.5).abs() < 1e-9);
        // two days out: 10 / (1 + 2)
        assert!((jazz.popularity_score - 10.0 / 3.0).abs() < 1e-3);
        assert!(!jazz.feature_vector.is_empty());
        assert_eq!(jazz.updated_at, now);
    }

    #[test]
    fn test_top_k_limits_edges_per_source() {
        let candidates: Vec<Candidate> = (1..=15)
            .map(|i| candidate(i, &format!("Open Mic {}", i), "venue", i, 5))
            .collect();
        let config = IndexConfig {
            top_k_edges: 4,
            ..seeded_config()
        };
        let artifacts = build_index_artifacts(&candidates, &config, Utc::now()).unwrap();
        assert_eq!(artifacts.batch.edges.len(), 15 * 4);
        assert_eq!(artifacts.batch.snapshot.event_ids.len(), 15);
    }

    #[test]
    fn test_rebuild_is_idempotent_on_final_scores() {
        let now = Utc::now();
        let first = build_index_artifacts(&corpus(), &seeded_config(), now).unwrap();
        let second = build_index_artifacts(&corpus(), &seeded_config(), now).unwrap();

        assert_eq!(first.batch.snapshot.event_ids, second.batch.snapshot.event_ids);
        for (a, b) in first.batch.edges.iter().zip(second.batch.edges.iter()) {
            assert_eq!((a.source_id, a.target_id), (b.source_id, b.target_id));
            assert!((a.final_score - b.final_score).abs() < 1e-9);
        }
    }

    #[tokio::test]
    async fn test_publish_and_invalidate_cache() {
        let store = Arc::new(InMemorySnapshotStore::new());
        let cache = Arc::new(InMemoryCache::new());
        cache
            .set(SNAPSHOT_CACHE_KEY, vec![1], std::time::Duration::from_secs(60))
            .await
            .unwrap();
        cache
            .set(SNAPSHOT_ID_CACHE_KEY, vec![1], std::time::Duration::from_secs(60))
            .await
            .unwrap();

        let outcome = job(corpus(), store.clone(), cache.clone())
            .trigger_batch_rebuild()
            .await;

        assert!(outcome.is_success());
        assert_eq!(outcome.candidates(), 3);
        assert_eq!(store.current_count(), 1);
        assert_eq!(store.edges().len(), 6);
        assert!(store.derived_scores(3).is_some());
        assert!(!cache.contains_key(SNAPSHOT_CACHE_KEY));
        assert!(!cache.contains_key(SNAPSHOT_ID_CACHE_KEY));
    }

    #[tokio::test]
    async fn test_insufficient_data_keeps_previous_snapshot() {
        let store = Arc::new(InMemorySnapshotStore::new());
        let cache = Arc::new(InMemoryCache::new());
        job(corpus(), store.clone(), cache.clone())
            .trigger_batch_rebuild()
            .await;
        let before = store.current_snapshot().await.unwrap().unwrap();

        let outcome = job(corpus()[..1].to_vec(), store.clone(), cache)
            .trigger_batch_rebuild()
            .await;

        assert!(matches!(outcome, RebuildOutcome::Skipped { candidates: 1 }));
        assert!(outcome.is_success());
        let after = store.current_snapshot().await.unwrap().unwrap();
        assert_eq!(before.id, after.id);
    }

    #[tokio::test]
    async fn test_failed_publish_is_reported() {
        let store = Arc::new(InMemorySnapshotStore::new());
        store.fail_next_publish();

        let outcome = job(corpus(), store.clone(), Arc::new(InMemoryCache::new()))
            .trigger_batch_rebuild()
            .await;

        match outcome {
            RebuildOutcome::Failed { candidates, error } => {
                assert_eq!(candidates, 3);
                assert!(error.contains("Publish failed"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(store.current_count(), 0);
        assert!(store.edges().is_empty());
    }

    #[tokio::test]
    async fn test_overlapping_run_is_rejected() {
        let job = job(
            corpus(),
            Arc::new(InMemorySnapshotStore::new()),
            Arc::new(InMemoryCache::new()),
        );

        let _held = job.running.lock().await;
        let err = job.rebuild().await.unwrap_err();
        assert!(matches!(err, AppError::Build(ref msg) if msg.contains("already in progress")));
    }
}
