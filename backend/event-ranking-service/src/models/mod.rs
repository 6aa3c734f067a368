use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub type EventId = i64;
pub type OwnerId = i64;
pub type ViewerId = i64;
pub type InterestId = i64;

/// Lifecycle status of an event as reported by the domain layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Scheduled,
    Live,
    Ended,
}

impl EventStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Live => "live",
            Self::Ended => "ended",
        }
    }

    /// Unknown values are treated as scheduled.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "live" => Self::Live,
            "ended" | "concluded" => Self::Ended,
            _ => Self::Scheduled,
        }
    }
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interest {
    pub id: InterestId,
    pub name: String,
}

/// An event as read from the candidate source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub id: EventId,
    pub title: String,
    pub description: String,
    pub interests: Vec<Interest>,
    pub owner_id: OwnerId,
    pub owner_name: String,
    pub owner_subscriber_count: i64,
    pub start_time: DateTime<Utc>,
    pub reminder_count: i64,
    pub status: EventStatus,
}

impl Candidate {
    /// Starts strictly after `now`
    pub fn is_upcoming(&self, now: DateTime<Utc>) -> bool {
        self.start_time > now
    }

    /// Already started and flagged live by the domain layer
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.start_time <= now && self.status == EventStatus::Live
    }

    /// Not yet started; the set the index builder processes
    pub fn is_indexable(&self, now: DateTime<Utc>) -> bool {
        self.start_time >= now
    }

    pub fn matches_interest(&self, interest: Option<&str>) -> bool {
        match interest {
            Some(name) => self.interests.iter().any(|i| i.name == name),
            None => true,
        }
    }

    pub fn interest_match_count(&self, interest_ids: &HashSet<InterestId>) -> usize {
        self.interests
            .iter()
            .filter(|i| interest_ids.contains(&i.id))
            .count()
    }
}

/// Directed similarity edge produced by the index builder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityEdge {
    pub source_id: EventId,
    pub target_id: EventId,
    pub similarity_score: f64,
    pub engagement_boost: f64,
    pub final_score: f64,
}

/// Persisted ANN snapshot row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSnapshot {
    pub id: i64,
    pub index_blob: Vec<u8>,
    /// Position in this list is the item slot inside the index
    pub event_ids: Vec<EventId>,
    pub vector_size: usize,
    pub created_at: DateTime<Utc>,
    pub is_current: bool,
}

#[derive(Debug, Clone)]
pub struct NewIndexSnapshot {
    pub index_blob: Vec<u8>,
    pub event_ids: Vec<EventId>,
    pub vector_size: usize,
    pub created_at: DateTime<Utc>,
}

/// Derived fields written back onto a candidate during publish
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedScores {
    pub event_id: EventId,
    pub popularity_score: f64,
    pub engagement_score: f64,
    /// bincode-encoded dense feature vector
    pub feature_vector: Vec<u8>,
    pub updated_at: DateTime<Utc>,
}

/// Everything one batch run publishes, applied all-or-nothing
#[derive(Debug, Clone)]
pub struct PublishBatch {
    pub scores: Vec<DerivedScores>,
    pub snapshot: NewIndexSnapshot,
    pub edges: Vec<SimilarityEdge>,
}

/// Preference signals of one viewer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ViewerContext {
    pub viewer_id: ViewerId,
    pub interest_ids: HashSet<InterestId>,
    pub followed_owner_ids: HashSet<OwnerId>,
    /// Ordered as returned by the viewer source
    pub reminder_event_ids: Vec<EventId>,
}

impl ViewerContext {
    /// No usable preference signal at all
    pub fn is_cold(&self) -> bool {
        self.interest_ids.is_empty()
            && self.followed_owner_ids.is_empty()
            && self.reminder_event_ids.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilarHit {
    pub event_id: EventId,
    pub score: f64,
}

/// Neighbors tagged with the path that produced them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SimilarNeighbors {
    /// Served from the ANN snapshot; scores in [0, 1]
    Ann(Vec<SimilarHit>),
    /// Served from the persisted edge table; scores are edge final scores
    EdgeTable(Vec<SimilarHit>),
}

impl SimilarNeighbors {
    pub fn hits(&self) -> &[SimilarHit] {
        match self {
            Self::Ann(hits) | Self::EdgeTable(hits) => hits,
        }
    }

    pub fn into_hits(self) -> Vec<SimilarHit> {
        match self {
            Self::Ann(hits) | Self::EdgeTable(hits) => hits,
        }
    }

    pub fn source(&self) -> &'static str {
        match self {
            Self::Ann(_) => "ann",
            Self::EdgeTable(_) => "edge_table",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Segment {
    Live,
    Upcoming,
}

/// One entry of a ranked list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedEvent {
    pub event_id: EventId,
    pub owner_id: OwnerId,
    pub score: f64,
    pub segment: Segment,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn candidate(start_offset_hours: i64, status: EventStatus) -> Candidate {
        Candidate {
            id: 1,
            title: "Jazz Night".to_string(),
            description: String::new(),
            interests: vec![
                Interest { id: 10, name: "music".to_string() },
                Interest { id: 11, name: "jazz".to_string() },
            ],
            owner_id: 7,
            owner_name: "club".to_string(),
            owner_subscriber_count: 0,
            start_time: Utc::now() + Duration::hours(start_offset_hours),
            reminder_count: 0,
            status,
        }
    }

    #[test]
    fn test_partition_predicates() {
        let now = Utc::now();
        let future = candidate(5, EventStatus::Scheduled);
        assert!(future.is_upcoming(now));
        assert!(future.is_indexable(now));
        assert!(!future.is_live(now));

        let started = candidate(-1, EventStatus::Live);
        assert!(started.is_live(now));
        assert!(!started.is_upcoming(now));

        let started_not_live = candidate(-1, EventStatus::Scheduled);
        assert!(!started_not_live.is_live(now));
    }

    #[test]
    fn test_interest_matching() {
        let c = candidate(1, EventStatus::Scheduled);
        assert!(c.matches_interest(None));
        assert!(c.matches_interest(Some("jazz")));
        assert!(!c.matches_interest(Some("football")));

        let ids: HashSet<InterestId> = [11, 99].into_iter().collect();
        assert_eq!(c.interest_match_count(&ids), 1);
    }

    #[test]
    fn test_viewer_cold_start() {
        let mut viewer = ViewerContext::default();
        assert!(viewer.is_cold());
        viewer.reminder_event_ids.push(3);
        assert!(!viewer.is_cold());
    }

    #[test]
    fn test_neighbors_compare_by_path_and_hits() {
        let hits = vec![SimilarHit { event_id: 2, score: 0.75 }];
        let ann = SimilarNeighbors::Ann(hits.clone());
        assert_eq!(ann, SimilarNeighbors::Ann(hits.clone()));
        assert_ne!(ann, SimilarNeighbors::EdgeTable(hits));
        assert_eq!(ann.source(), "ann");
        assert_eq!(ann.into_hits()[0].score, 0.75);
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(EventStatus::parse("live"), EventStatus::Live);
        assert_eq!(EventStatus::parse("concluded"), EventStatus::Ended);
        assert_eq!(EventStatus::parse("whatever"), EventStatus::Scheduled);
    }
}
