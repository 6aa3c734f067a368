use crate::config::RecommendationConfig;
use crate::models::{OwnerId, RankedEvent};
use std::collections::HashMap;

/// Limits applied while assembling a ranked list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssemblyLimits {
    pub target_len: usize,
    pub max_per_owner: usize,
    /// The per-owner cap only holds while fewer slots than this are filled
    pub relax_below: usize,
    pub seed_live: usize,
    pub max_live: usize,
}

impl From<&RecommendationConfig> for AssemblyLimits {
    fn from(config: &RecommendationConfig) -> Self {
        Self {
            target_len: config.target_len,
            max_per_owner: config.max_per_owner,
            relax_below: config.relax_below,
            seed_live: config.seed_live,
            max_live: config.max_live(),
        }
    }
}

struct Assembly {
    result: Vec<RankedEvent>,
    per_owner: HashMap<OwnerId, usize>,
    target_len: usize,
}

impl Assembly {
    fn is_full(&self) -> bool {
        self.result.len() >= self.target_len
    }

    fn owner_count(&self, owner_id: OwnerId) -> usize {
        self.per_owner.get(&owner_id).copied().unwrap_or(0)
    }

    fn push(&mut self, event: &RankedEvent) {
        *self.per_owner.entry(event.owner_id).or_insert(0) += 1;
        self.result.push(event.clone());
    }
}

/// Merge score-sorted live and upcoming lists into one diverse list
///
/// 1. seed with the top live entries
/// 2. fill from upcoming; an owner at the cap is deferred while the list is
///    still short of `relax_below`
/// 3. backfill live entries under the owner cap, bounded by `max_live` overall
/// 4. pad with deferred and unvisited upcoming entries, cap ignored
pub fn assemble(
    live: &[RankedEvent],
    upcoming: &[RankedEvent],
    limits: &AssemblyLimits,
) -> Vec<RankedEvent> {
    let mut assembly = Assembly {
        result: Vec::with_capacity(limits.target_len),
        per_owner: HashMap::new(),
        target_len: limits.target_len,
    };

    let seeded = live
        .len()
        .min(limits.seed_live)
        .min(limits.max_live)
        .min(limits.target_len);
    for event in &live[..seeded] {
        assembly.push(event);
    }

    let mut deferred: Vec<usize> = Vec::new();
    let mut next_upcoming = 0;
    while !assembly.is_full() && next_upcoming < upcoming.len() {
        let event = &upcoming[next_upcoming];
        if assembly.owner_count(event.owner_id) >= limits.max_per_owner
            && assembly.result.len() < limits.relax_below
        {
            deferred.push(next_upcoming);
        } else {
            assembly.push(event);
        }
        next_upcoming += 1;
    }

    let mut live_budget = limits.max_live.saturating_sub(seeded);
    for event in &live[seeded..] {
        if live_budget == 0 || assembly.is_full() {
            break;
        }
        if assembly.owner_count(event.owner_id) >= limits.max_per_owner {
            continue;
        }
        assembly.push(event);
        live_budget -= 1;
    }

    // Deferred indices precede the unvisited ones, so score order is kept
    let padding = deferred
        .into_iter()
        .chain(next_upcoming..upcoming.len());
    for idx in padding {
        if assembly.is_full() {
            break;
        }
        assembly.push(&upcoming[idx]);
    }

    assembly.result
}
