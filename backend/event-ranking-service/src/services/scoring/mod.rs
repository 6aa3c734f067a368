//! Hybrid recommendation scorer
//!
//! Ranks live and upcoming events for one viewer by blending time urgency,
//! followed owners, matching interests, popularity, reminder-list membership
//! and content similarity to the viewer's reminded events. The two segments
//! are merged under per-owner and live-share limits.
//!
//! `recommend` never fails: cold viewers get the trending list, and any
//! error while ranking degrades to trending as well.

mod diversity;
mod signals;
mod trending;

pub use diversity::{assemble, AssemblyLimits};
pub use signals::{
    base_score, Jitter, JitterSampler, SignalWeights, SimilarityBoosts, LIVE_WEIGHTS,
    SIMILARITY_NEIGHBORS, SIMILARITY_WEIGHT, UPCOMING_WEIGHTS,
};
pub use trending::trending_order;

use crate::config::RecommendationConfig;
use crate::error::Result;
use crate::models::{Candidate, RankedEvent, Segment, ViewerContext, ViewerId};
use crate::services::cache::KvCache;
use crate::services::similarity::SimilarityService;
use crate::services::sources::{CandidateSource, ViewerSource};
use crate::utils::cmp_desc;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Result cache key for a viewer and optional interest filter
pub fn result_cache_key(viewer_id: ViewerId, interest: Option<&str>) -> String {
    format!("event_recs:{}:{}", viewer_id, interest.unwrap_or("all"))
}

pub struct HybridScorer {
    candidates: Arc<dyn CandidateSource>,
    viewers: Arc<dyn ViewerSource>,
    similarity: Arc<SimilarityService>,
    cache: Arc<dyn KvCache>,
    config: RecommendationConfig,
    jitter: Jitter,
}

impl HybridScorer {
    pub fn new(
        candidates: Arc<dyn CandidateSource>,
        viewers: Arc<dyn ViewerSource>,
        similarity: Arc<SimilarityService>,
        cache: Arc<dyn KvCache>,
        config: RecommendationConfig,
    ) -> Self {
        Self {
            candidates,
            viewers,
            similarity,
            cache,
            config,
            jitter: Jitter::Random,
        }
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// Ranked list for a viewer, resolving the profile from the viewer source
    pub async fn recommend(
        &self,
        viewer_id: ViewerId,
        interest: Option<&str>,
        now: DateTime<Utc>,
    ) -> Vec<RankedEvent> {
        let cache_key = result_cache_key(viewer_id, interest);
        if let Some(cached) = self.cached_result(&cache_key).await {
            return cached;
        }

        let viewer = match self.viewers.viewer_context(viewer_id).await {
            Ok(Some(viewer)) => viewer,
            Ok(None) => {
                debug!(viewer_id = viewer_id, "Unknown viewer, serving trending");
                return self.trending(interest, now).await;
            }
            Err(e) => {
                warn!(viewer_id = viewer_id, error = %e, "Viewer profile unavailable, serving trending");
                return self.trending(interest, now).await;
            }
        };

        self.rank_or_degrade(&viewer, interest, now, &cache_key).await
    }

    /// Ranked list for an already resolved viewer profile
    pub async fn recommend_for(
        &self,
        viewer: &ViewerContext,
        interest: Option<&str>,
        now: DateTime<Utc>,
    ) -> Vec<RankedEvent> {
        let cache_key = result_cache_key(viewer.viewer_id, interest);
        if let Some(cached) = self.cached_result(&cache_key).await {
            return cached;
        }
        self.rank_or_degrade(viewer, interest, now, &cache_key).await
    }

    /// Viewer-independent list, also the recovery path for `recommend`
    pub async fn trending(&self, interest: Option<&str>, now: DateTime<Utc>) -> Vec<RankedEvent> {
        match self.candidates.upcoming_candidates(now, interest).await {
            Ok(candidates) => trending_order(&candidates, now, self.config.target_len),
            Err(e) => {
                warn!(error = %e, "Trending candidates unavailable");
                Vec::new()
            }
        }
    }

    async fn rank_or_degrade(
        &self,
        viewer: &ViewerContext,
        interest: Option<&str>,
        now: DateTime<Utc>,
        cache_key: &str,
    ) -> Vec<RankedEvent> {
        if viewer.is_cold() {
            debug!(viewer_id = viewer.viewer_id, "Cold viewer, serving trending");
            return self.trending(interest, now).await;
        }

        let start = Instant::now();
        match self.rank(viewer, interest, now).await {
            Ok(ranked) => {
                info!(
                    viewer_id = viewer.viewer_id,
                    results = ranked.len(),
                    latency_ms = start.elapsed().as_millis() as u64,
                    "Ranked recommendations"
                );
                self.store_result(cache_key, &ranked).await;
                ranked
            }
            Err(e) => {
                warn!(viewer_id = viewer.viewer_id, error = %e, "Ranking failed, serving trending");
                self.trending(interest, now).await
            }
        }
    }

    async fn rank(
        &self,
        viewer: &ViewerContext,
        interest: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Vec<RankedEvent>> {
        let live = self.candidates.live_candidates(now, interest).await?;
        let upcoming = self.candidates.upcoming_candidates(now, interest).await?;
        let boosts = self.similarity_boosts(viewer).await;

        let mut sampler = self.jitter.sampler();
        let live = score_segment(&live, viewer, &boosts, &LIVE_WEIGHTS, Segment::Live, now, &mut sampler);
        let upcoming = score_segment(
            &upcoming,
            viewer,
            &boosts,
            &UPCOMING_WEIGHTS,
            Segment::Upcoming,
            now,
            &mut sampler,
        );

        debug!(
            live = live.len(),
            upcoming = upcoming.len(),
            similarity_boosts = boosts.len(),
            "Scored candidates"
        );

        Ok(assemble(&live, &upcoming, &AssemblyLimits::from(&self.config)))
    }

    /// Best similarity of every neighbor of the viewer's first reminded events
    async fn similarity_boosts(&self, viewer: &ViewerContext) -> SimilarityBoosts {
        let mut boosts = SimilarityBoosts::new();
        for seed in viewer
            .reminder_event_ids
            .iter()
            .take(self.config.similarity_seeds)
        {
            for (event_id, score) in self
                .similarity
                .lookup_similar(*seed, SIMILARITY_NEIGHBORS)
                .await
            {
                signals::merge_similarity_boost(&mut boosts, event_id, score);
            }
        }
        boosts
    }

    async fn cached_result(&self, key: &str) -> Option<Vec<RankedEvent>> {
        if !self.config.result_cache_enabled {
            return None;
        }

        match self.cache.get(key).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<Vec<RankedEvent>>(&bytes) {
                Ok(ranked) => {
                    debug!(key = key, "Recommendation cache hit");
                    Some(ranked)
                }
                Err(e) => {
                    warn!(key = key, error = %e, "Discarding undecodable cached recommendations");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(key = key, error = %e, "Recommendation cache read failed");
                None
            }
        }
    }

    async fn store_result(&self, key: &str, ranked: &[RankedEvent]) {
        if !self.config.result_cache_enabled {
            return;
        }

        let bytes = match serde_json::to_vec(ranked) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key = key, error = %e, "Failed to encode recommendations for cache");
                return;
            }
        };
        if let Err(e) = self.cache.set(key, bytes, self.config.cache_ttl()).await {
            warn!(key = key, error = %e, "Failed to cache recommendations");
        }
    }
}

fn score_segment(
    candidates: &[Candidate],
    viewer: &ViewerContext,
    boosts: &SimilarityBoosts,
    weights: &SignalWeights,
    segment: Segment,
    now: DateTime<Utc>,
    sampler: &mut JitterSampler,
) -> Vec<RankedEvent> {
    let mut ranked: Vec<RankedEvent> = candidates
        .iter()
        .map(|candidate| RankedEvent {
            event_id: candidate.id,
            owner_id: candidate.owner_id,
            score: base_score(candidate, viewer, boosts, weights, now)
                + sampler.sample(weights.max_jitter),
            segment,
        })
        .collect();

    ranked.sort_by(|a, b| cmp_desc(a.score, b.score).then_with(|| a.event_id.cmp(&b.event_id)));
    ranked
}
