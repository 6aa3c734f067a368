use super::SnapshotStore;
use crate::error::{AppError, Result};
use crate::models::{EventId, IndexSnapshot, PublishBatch, SimilarityEdge};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, info};

#[derive(Debug, sqlx::FromRow)]
struct SnapshotRow {
    id: i64,
    index_blob: Vec<u8>,
    event_ids: Vec<i64>,
    vector_size: i32,
    created_at: DateTime<Utc>,
    is_current: bool,
}

impl From<SnapshotRow> for IndexSnapshot {
    fn from(row: SnapshotRow) -> Self {
        Self {
            id: row.id,
            index_blob: row.index_blob,
            event_ids: row.event_ids,
            vector_size: row.vector_size.max(0) as usize,
            created_at: row.created_at,
            is_current: row.is_current,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct EdgeRow {
    event_id: i64,
    similar_event_id: i64,
    similarity_score: f64,
    engagement_boost: f64,
    final_score: f64,
}

impl From<EdgeRow> for SimilarityEdge {
    fn from(row: EdgeRow) -> Self {
        Self {
            source_id: row.event_id,
            target_id: row.similar_event_id,
            similarity_score: row.similarity_score,
            engagement_boost: row.engagement_boost,
            final_score: row.final_score,
        }
    }
}

/// Snapshot store backed by the `event_index_snapshots` and
/// `event_similarities` tables
#[derive(Clone)]
pub struct PostgresSnapshotStore {
    pool: PgPool,
    edge_insert_batch: usize,
}

impl PostgresSnapshotStore {
    pub fn new(pool: PgPool, edge_insert_batch: usize) -> Self {
        Self {
            pool,
            edge_insert_batch: edge_insert_batch.max(1),
        }
    }

    async fn write_scores(
        tx: &mut Transaction<'_, Postgres>,
        batch: &PublishBatch,
    ) -> Result<u64> {
        if batch.scores.is_empty() {
            return Ok(0);
        }

        let ids: Vec<i64> = batch.scores.iter().map(|s| s.event_id).collect();
        let popularity: Vec<f64> = batch.scores.iter().map(|s| s.popularity_score).collect();
        let engagement: Vec<f64> = batch.scores.iter().map(|s| s.engagement_score).collect();
        let vectors: Vec<Vec<u8>> = batch
            .scores
            .iter()
            .map(|s| s.feature_vector.clone())
            .collect();
        let updated_at = batch.scores[0].updated_at;

        let result = sqlx::query(
            r#"
            UPDATE events AS e
            SET popularity_score = d.popularity_score,
                engagement_score = d.engagement_score,
                feature_vector = d.feature_vector,
                last_recommendation_update = $5
            FROM UNNEST($1::bigint[], $2::float8[], $3::float8[], $4::bytea[])
                AS d(id, popularity_score, engagement_score, feature_vector)
            WHERE e.id = d.id
            "#,
        )
        .bind(&ids)
        .bind(&popularity)
        .bind(&engagement)
        .bind(&vectors)
        .bind(updated_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| AppError::Persistence(format!("derived score write-back failed: {}", e)))?;

        Ok(result.rows_affected())
    }

    async fn swap_snapshot(
        tx: &mut Transaction<'_, Postgres>,
        batch: &PublishBatch,
    ) -> Result<i64> {
        let retired: Vec<i64> = sqlx::query_scalar(
            "UPDATE event_index_snapshots SET is_current = FALSE WHERE is_current = TRUE RETURNING id",
        )
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| AppError::Persistence(format!("retiring current snapshot failed: {}", e)))?;

        // Only the snapshot being replaced is kept next to the new one
        let pruned = sqlx::query(
            "DELETE FROM event_index_snapshots WHERE is_current = FALSE AND NOT (id = ANY($1))",
        )
        .bind(&retired)
        .execute(&mut **tx)
        .await
        .map_err(|e| AppError::Persistence(format!("pruning old snapshots failed: {}", e)))?;

        let snapshot = &batch.snapshot;
        let snapshot_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO event_index_snapshots (index_blob, event_ids, vector_size, created_at, is_current)
            VALUES ($1, $2, $3, $4, TRUE)
            RETURNING id
            "#,
        )
        .bind(&snapshot.index_blob)
        .bind(&snapshot.event_ids)
        .bind(snapshot.vector_size as i32)
        .bind(snapshot.created_at)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| AppError::Persistence(format!("snapshot insert failed: {}", e)))?;

        debug!(
            retired = retired.len(),
            pruned = pruned.rows_affected(),
            snapshot_id = snapshot_id,
            "Swapped current index snapshot"
        );
        Ok(snapshot_id)
    }

    async fn replace_edges(
        tx: &mut Transaction<'_, Postgres>,
        edges: &[SimilarityEdge],
        chunk_size: usize,
    ) -> Result<u64> {
        let deleted = sqlx::query("DELETE FROM event_similarities")
            .execute(&mut **tx)
            .await
            .map_err(|e| AppError::Persistence(format!("edge table clear failed: {}", e)))?;

        let mut inserted = 0u64;
        for (chunk_idx, chunk) in edges.chunks(chunk_size).enumerate() {
            let sources: Vec<i64> = chunk.iter().map(|e| e.source_id).collect();
            let targets: Vec<i64> = chunk.iter().map(|e| e.target_id).collect();
            let similarity: Vec<f64> = chunk.iter().map(|e| e.similarity_score).collect();
            let boost: Vec<f64> = chunk.iter().map(|e| e.engagement_boost).collect();
            let final_scores: Vec<f64> = chunk.iter().map(|e| e.final_score).collect();

            let result = sqlx::query(
                r#"
                INSERT INTO event_similarities
                    (event_id, similar_event_id, similarity_score, engagement_boost, final_score)
                SELECT * FROM UNNEST($1::bigint[], $2::bigint[], $3::float8[], $4::float8[], $5::float8[])
                "#,
            )
            .bind(&sources)
            .bind(&targets)
            .bind(&similarity)
            .bind(&boost)
            .bind(&final_scores)
            .execute(&mut **tx)
            .await
            .map_err(|e| {
                AppError::Persistence(format!("edge insert failed in chunk {}: {}", chunk_idx, e))
            })?;

            inserted += result.rows_affected();
            debug!(chunk = chunk_idx, rows = chunk.len(), "Inserted similarity edge chunk");
        }

        debug!(
            deleted = deleted.rows_affected(),
            inserted = inserted,
            "Replaced similarity edge table"
        );
        Ok(inserted)
    }
}

#[async_trait]
impl SnapshotStore for PostgresSnapshotStore {
    async fn current_snapshot(&self) -> Result<Option<IndexSnapshot>> {
        let row = sqlx::query_as::<_, SnapshotRow>(
            r#"
            SELECT id, index_blob, event_ids, vector_size, created_at, is_current
            FROM event_index_snapshots
            WHERE is_current = TRUE
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(IndexSnapshot::from))
    }

    async fn top_edges(&self, event_id: EventId, limit: usize) -> Result<Vec<SimilarityEdge>> {
        let rows = sqlx::query_as::<_, EdgeRow>(
            r#"
            SELECT event_id, similar_event_id, similarity_score, engagement_boost, final_score
            FROM event_similarities
            WHERE event_id = $1
            ORDER BY final_score DESC
            LIMIT $2
            "#,
        )
        .bind(event_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(SimilarityEdge::from).collect())
    }

    async fn publish(&self, batch: PublishBatch) -> Result<i64> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::Persistence(format!("failed to open transaction: {}", e)))?;

        // Any early return drops `tx`, which rolls the whole publish back
        let scored = Self::write_scores(&mut tx, &batch).await?;
        let snapshot_id = Self::swap_snapshot(&mut tx, &batch).await?;
        let edges = Self::replace_edges(&mut tx, &batch.edges, self.edge_insert_batch).await?;

        tx.commit()
            .await
            .map_err(|e| AppError::Persistence(format!("commit failed: {}", e)))?;

        info!(
            snapshot_id = snapshot_id,
            candidates_updated = scored,
            edges_written = edges,
            "Published index snapshot"
        );
        Ok(snapshot_id)
    }
}
