use crate::models::{Candidate, RankedEvent, Segment};
use crate::utils::days_until;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::HashSet;

/// Share of the list taken by reminder count; the rest goes to the soonest events
const POPULAR_SHARE: f64 = 0.7;

/// Viewer-independent list over upcoming candidates
///
/// The most-reminded events come first (ties go to the sooner event), then
/// the soonest of the remaining ones. Score is the reminder count.
pub fn trending_order(
    candidates: &[Candidate],
    now: DateTime<Utc>,
    target_len: usize,
) -> Vec<RankedEvent> {
    let popular_len = (target_len as f64 * POPULAR_SHARE).round() as usize;
    let soonest_len = target_len.saturating_sub(popular_len);

    let by_start = |a: &&Candidate, b: &&Candidate| -> Ordering {
        days_until(a.start_time, now)
            .total_cmp(&days_until(b.start_time, now))
            .then_with(|| a.id.cmp(&b.id))
    };

    let mut upcoming: Vec<&Candidate> = candidates.iter().filter(|c| c.is_upcoming(now)).collect();

    upcoming.sort_by(|a, b| {
        b.reminder_count
            .cmp(&a.reminder_count)
            .then_with(|| by_start(a, b))
    });
    let popular: Vec<&Candidate> = upcoming.iter().take(popular_len).copied().collect();
    let taken: HashSet<i64> = popular.iter().map(|c| c.id).collect();

    let mut rest: Vec<&Candidate> = upcoming
        .into_iter()
        .filter(|c| !taken.contains(&c.id))
        .collect();
    rest.sort_by(by_start);

    popular
        .into_iter()
        .chain(rest.into_iter().take(soonest_len))
        .take(target_len)
        .map(|c| RankedEvent {
            event_id: c.id,
            owner_id: c.owner_id,
            score: c.reminder_count as f64,
            segment: Segment::Upcoming,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EventStatus;
    use chrono::Duration;

    fn candidate(id: i64, hours: i64, reminders: i64) -> Candidate {
        Candidate {
            id,
            title: format!("Event {}", id),
            description: String::new(),
            interests: vec![],
            owner_id: id,
            owner_name: "owner".to_string(),
            owner_subscriber_count: 0,
            start_time: Utc::now() + Duration::hours(hours),
            reminder_count: reminders,
            status: EventStatus::Scheduled,
        }
    }

    #[test]
    fn test_popular_then_soonest() {
        // 40 popular-ish events far out, 20 unpopular events soon
        let mut candidates: Vec<Candidate> = (0..40).map(|i| candidate(i, 200 + i, 100 - i)).collect();
        candidates.extend((40..60).map(|i| candidate(i, 1 + i, 0)));
        let now = Utc::now();

        let result = trending_order(&candidates, now, 50);
        assert_eq!(result.len(), 50);

        let head: Vec<i64> = result.iter().take(35).map(|e| e.event_id).collect();
        assert_eq!(head, (0..35).collect::<Vec<i64>>());

        // remaining slots go to the soonest of what is left
        let tail: Vec<i64> = result.iter().skip(35).map(|e| e.event_id).collect();
        assert_eq!(tail, (40..55).collect::<Vec<i64>>());
    }

    #[test]
    fn test_reminder_ties_prefer_sooner() {
        let candidates = vec![candidate(1, 48, 5), candidate(2, 12, 5), candidate(3, 24, 9)];
        let result = trending_order(&candidates, Utc::now(), 50);
        let ids: Vec<i64> = result.iter().map(|e| e.event_id).collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }

    #[test]
    fn test_started_events_excluded() {
        let candidates = vec![candidate(1, -2, 50), candidate(2, 3, 0)];
        let result = trending_order(&candidates, Utc::now(), 50);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].event_id, 2);
    }
}
