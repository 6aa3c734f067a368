use super::{CandidateSource, ViewerSource};
use crate::error::Result;
use crate::models::{Candidate, EventStatus, Interest, ViewerContext, ViewerId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::debug;

const CANDIDATE_SELECT: &str = r#"
    SELECT
        e.id,
        e.title,
        COALESCE(e.description, '') AS description,
        e.owner_id,
        o.display_name AS owner_name,
        COALESCE(o.subscriber_count, 0)::bigint AS owner_subscriber_count,
        e.start_time,
        e.status,
        (SELECT COUNT(*) FROM event_reminders r WHERE r.event_id = e.id)::bigint AS reminder_count,
        ARRAY(
            SELECT i.id FROM event_interests ei
            JOIN interests i ON i.id = ei.interest_id
            WHERE ei.event_id = e.id ORDER BY i.id
        ) AS interest_ids,
        ARRAY(
            SELECT i.name FROM event_interests ei
            JOIN interests i ON i.id = ei.interest_id
            WHERE ei.event_id = e.id ORDER BY i.id
        ) AS interest_names
    FROM events e
    JOIN owners o ON o.id = e.owner_id
"#;

const INTEREST_FILTER: &str = r#"
    AND ($2::text IS NULL OR EXISTS (
        SELECT 1 FROM event_interests ei
        JOIN interests i ON i.id = ei.interest_id
        WHERE ei.event_id = e.id AND i.name = $2
    ))
"#;

#[derive(Debug, sqlx::FromRow)]
struct CandidateRow {
    id: i64,
    title: String,
    description: String,
    owner_id: i64,
    owner_name: String,
    owner_subscriber_count: i64,
    start_time: DateTime<Utc>,
    status: String,
    reminder_count: i64,
    interest_ids: Vec<i64>,
    interest_names: Vec<String>,
}

impl From<CandidateRow> for Candidate {
    fn from(row: CandidateRow) -> Self {
        let interests = row
            .interest_ids
            .into_iter()
            .zip(row.interest_names)
            .map(|(id, name)| Interest { id, name })
            .collect();

        Self {
            id: row.id,
            title: row.title,
            description: row.description,
            interests,
            owner_id: row.owner_id,
            owner_name: row.owner_name,
            owner_subscriber_count: row.owner_subscriber_count,
            start_time: row.start_time,
            reminder_count: row.reminder_count,
            status: EventStatus::parse(&row.status),
        }
    }
}

/// Reads candidates from the `events`, `owners`, `interests` and
/// `event_reminders` tables
#[derive(Clone)]
pub struct PostgresCandidateSource {
    pool: PgPool,
}

impl PostgresCandidateSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch(
        &self,
        predicate: &str,
        now: DateTime<Utc>,
        interest: Option<&str>,
    ) -> Result<Vec<Candidate>> {
        let sql = format!(
            "{} WHERE {} {} ORDER BY e.start_time ASC, e.id ASC",
            CANDIDATE_SELECT, predicate, INTEREST_FILTER
        );

        let rows = sqlx::query_as::<_, CandidateRow>(&sql)
            .bind(now)
            .bind(interest)
            .fetch_all(&self.pool)
            .await?;

        debug!(rows = rows.len(), predicate = predicate, "Fetched candidates");
        Ok(rows.into_iter().map(Candidate::from).collect())
    }
}

#[async_trait]
impl CandidateSource for PostgresCandidateSource {
    async fn indexable_candidates(&self, now: DateTime<Utc>) -> Result<Vec<Candidate>> {
        self.fetch("e.start_time >= $1", now, None).await
    }

    async fn upcoming_candidates(
        &self,
        now: DateTime<Utc>,
        interest: Option<&str>,
    ) -> Result<Vec<Candidate>> {
        self.fetch("e.start_time > $1", now, interest).await
    }

    async fn live_candidates(
        &self,
        now: DateTime<Utc>,
        interest: Option<&str>,
    ) -> Result<Vec<Candidate>> {
        self.fetch("e.start_time <= $1 AND e.status = 'live'", now, interest)
            .await
    }
}

/// Reads viewer preference signals from `viewers`, `viewer_interests`,
/// `viewer_subscriptions` and `event_reminders`
#[derive(Clone)]
pub struct PostgresViewerSource {
    pool: PgPool,
}

impl PostgresViewerSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ViewerSource for PostgresViewerSource {
    async fn viewer_context(&self, viewer_id: ViewerId) -> Result<Option<ViewerContext>> {
        let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM viewers WHERE id = $1")
            .bind(viewer_id)
            .fetch_optional(&self.pool)
            .await?;

        if exists.is_none() {
            return Ok(None);
        }

        let interest_ids: Vec<i64> = sqlx::query_scalar(
            "SELECT interest_id FROM viewer_interests WHERE viewer_id = $1",
        )
        .bind(viewer_id)
        .fetch_all(&self.pool)
        .await?;

        let followed_owner_ids: Vec<i64> = sqlx::query_scalar(
            "SELECT owner_id FROM viewer_subscriptions WHERE viewer_id = $1",
        )
        .bind(viewer_id)
        .fetch_all(&self.pool)
        .await?;

        let reminder_event_ids: Vec<i64> = sqlx::query_scalar(
            "SELECT event_id FROM event_reminders WHERE viewer_id = $1 ORDER BY created_at ASC, event_id ASC",
        )
        .bind(viewer_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(ViewerContext {
            viewer_id,
            interest_ids: interest_ids.into_iter().collect(),
            followed_owner_ids: followed_owner_ids.into_iter().collect(),
            reminder_event_ids,
        }))
    }
}
