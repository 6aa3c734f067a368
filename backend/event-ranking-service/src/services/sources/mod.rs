//! Read access to the domain layer's events and viewer profiles

mod memory;
mod postgres;

pub use memory::{InMemoryCandidateSource, InMemoryViewerSource};
pub use postgres::{PostgresCandidateSource, PostgresViewerSource};

use crate::error::Result;
use crate::models::{Candidate, ViewerContext, ViewerId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[async_trait]
pub trait CandidateSource: Send + Sync {
    /// Candidates the index builder processes: start time at or after `now`
    async fn indexable_candidates(&self, now: DateTime<Utc>) -> Result<Vec<Candidate>>;

    /// Candidates starting strictly after `now`, optionally restricted to one interest
    async fn upcoming_candidates(
        &self,
        now: DateTime<Utc>,
        interest: Option<&str>,
    ) -> Result<Vec<Candidate>>;

    /// Candidates already started and flagged live
    async fn live_candidates(
        &self,
        now: DateTime<Utc>,
        interest: Option<&str>,
    ) -> Result<Vec<Candidate>>;
}

#[async_trait]
pub trait ViewerSource: Send + Sync {
    /// `None` when the viewer has no profile at all
    async fn viewer_context(&self, viewer_id: ViewerId) -> Result<Option<ViewerContext>>;
}
