use super::{CandidateSource, ViewerSource};
use crate::error::Result;
use crate::models::{Candidate, ViewerContext, ViewerId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::RwLock;

/// Candidate source over an in-memory event list
#[derive(Debug, Default)]
pub struct InMemoryCandidateSource {
    candidates: RwLock<Vec<Candidate>>,
}

impl InMemoryCandidateSource {
    pub fn new(candidates: Vec<Candidate>) -> Self {
        Self {
            candidates: RwLock::new(candidates),
        }
    }

    /// Insert or replace by id
    pub fn upsert(&self, candidate: Candidate) {
        let mut candidates = self
            .candidates
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match candidates.iter_mut().find(|c| c.id == candidate.id) {
            Some(existing) => *existing = candidate,
            None => candidates.push(candidate),
        }
    }

    fn select<F>(&self, keep: F) -> Vec<Candidate>
    where
        F: Fn(&Candidate) -> bool,
    {
        let candidates = self
            .candidates
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut selected: Vec<Candidate> = candidates.iter().filter(|c| keep(c)).cloned().collect();
        selected.sort_by(|a, b| a.start_time.cmp(&b.start_time).then(a.id.cmp(&b.id)));
        selected
    }
}

#[async_trait]
impl CandidateSource for InMemoryCandidateSource {
    async fn indexable_candidates(&self, now: DateTime<Utc>) -> Result<Vec<Candidate>> {
        Ok(self.select(|c| c.is_indexable(now)))
    }

    async fn upcoming_candidates(
        &self,
        now: DateTime<Utc>,
        interest: Option<&str>,
    ) -> Result<Vec<Candidate>> {
        Ok(self.select(|c| c.is_upcoming(now) && c.matches_interest(interest)))
    }

    async fn live_candidates(
        &self,
        now: DateTime<Utc>,
        interest: Option<&str>,
    ) -> Result<Vec<Candidate>> {
        Ok(self.select(|c| c.is_live(now) && c.matches_interest(interest)))
    }
}

/// Viewer source over an in-memory profile map
#[derive(Debug, Default)]
pub struct InMemoryViewerSource {
    viewers: DashMap<ViewerId, ViewerContext>,
}

impl InMemoryViewerSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, viewer: ViewerContext) {
        self.viewers.insert(viewer.viewer_id, viewer);
    }
}

#[async_trait]
impl ViewerSource for InMemoryViewerSource {
    async fn viewer_context(&self, viewer_id: ViewerId) -> Result<Option<ViewerContext>> {
        Ok(self.viewers.get(&viewer_id).map(|v| v.clone()))
    }
}
