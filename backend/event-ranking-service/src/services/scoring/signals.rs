use crate::models::{Candidate, EventId, ViewerContext};
use crate::utils::{days_until, MIN_DAYS_UNTIL};
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;

/// Per-segment weights of the hybrid score
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalWeights {
    /// Upper bound of `10 / days_until`; zero disables the time term
    pub time_cap: f64,
    /// Flat bonus for every candidate of the segment
    pub segment_bonus: f64,
    pub subscription: f64,
    pub per_interest: f64,
    pub popularity_divisor: f64,
    pub popularity_cap: f64,
    pub on_reminder_list: f64,
    pub max_jitter: f64,
}

pub const UPCOMING_WEIGHTS: SignalWeights = SignalWeights {
    time_cap: 10.0,
    segment_bonus: 0.0,
    subscription: 3.0,
    per_interest: 2.0,
    popularity_divisor: 5.0,
    popularity_cap: 5.0,
    on_reminder_list: 1.5,
    max_jitter: 0.5,
};

pub const LIVE_WEIGHTS: SignalWeights = SignalWeights {
    time_cap: 0.0,
    segment_bonus: 5.0,
    subscription: 4.0,
    per_interest: 2.0,
    popularity_divisor: 3.0,
    popularity_cap: 6.0,
    on_reminder_list: 2.0,
    max_jitter: 0.3,
};

/// Multiplier on the best similarity against the viewer's reminder list
pub const SIMILARITY_WEIGHT: f64 = 3.0;

/// Neighbors fetched per similarity seed
pub const SIMILARITY_NEIGHBORS: usize = 5;

/// Tie-breaking noise source
///
/// Randomness is drawn from a per-request generator, so requests never
/// contend on shared state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Jitter {
    #[default]
    Random,
    /// Same seed, same noise sequence
    Seeded(u64),
    Disabled,
}

impl Jitter {
    pub fn sampler(&self) -> JitterSampler {
        match self {
            Jitter::Random => JitterSampler(Some(StdRng::from_entropy())),
            Jitter::Seeded(seed) => JitterSampler(Some(StdRng::seed_from_u64(*seed))),
            Jitter::Disabled => JitterSampler(None),
        }
    }
}

pub struct JitterSampler(Option<StdRng>);

impl JitterSampler {
    /// Uniform in `[0, max)`
    pub fn sample(&mut self, max: f64) -> f64 {
        match self.0.as_mut() {
            Some(rng) if max > 0.0 => rng.gen_range(0.0..max),
            _ => 0.0,
        }
    }
}

/// Best weighted similarity per event against the viewer's seed events
pub type SimilarityBoosts = HashMap<EventId, f64>;

pub fn merge_similarity_boost(boosts: &mut SimilarityBoosts, event_id: EventId, similarity: f64) {
    let boost = similarity * SIMILARITY_WEIGHT;
    let entry = boosts.entry(event_id).or_insert(0.0);
    if boost > *entry {
        *entry = boost;
    }
}

/// Hybrid score of one candidate before jitter
pub fn base_score(
    candidate: &Candidate,
    viewer: &ViewerContext,
    boosts: &SimilarityBoosts,
    weights: &SignalWeights,
    now: DateTime<Utc>,
) -> f64 {
    let time_score = if weights.time_cap > 0.0 {
        let days = days_until(candidate.start_time, now).max(MIN_DAYS_UNTIL);
        (10.0 / days).min(weights.time_cap)
    } else {
        0.0
    };

    let subscription = if viewer.followed_owner_ids.contains(&candidate.owner_id) {
        weights.subscription
    } else {
        0.0
    };

    let interests = candidate.interest_match_count(&viewer.interest_ids) as f64 * weights.per_interest;

    let popularity =
        (candidate.reminder_count as f64 / weights.popularity_divisor).min(weights.popularity_cap);

    let on_list = if viewer.reminder_event_ids.contains(&candidate.id) {
        weights.on_reminder_list
    } else {
        0.0
    };

    let similarity = boosts.get(&candidate.id).copied().unwrap_or(0.0);

    weights.segment_bonus + time_score + subscription + interests + popularity + on_list + similarity
}
