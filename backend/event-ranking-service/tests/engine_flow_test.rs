use chrono::{DateTime, Duration, Utc};
use event_ranking_service::config::{
    BatchConfig, Config, DatabaseConfig, IndexConfig, RecommendationConfig, RedisConfig,
    ServiceConfig,
};
use event_ranking_service::models::{
    Candidate, EventId, EventStatus, Interest, OwnerId, RankedEvent, Segment, ViewerContext,
};
use event_ranking_service::services::{
    InMemoryCache, InMemoryCandidateSource, InMemorySnapshotStore, InMemoryViewerSource,
    SnapshotStore,
};
use event_ranking_service::{EventRankingEngine, Jitter, RebuildOutcome};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio_test::assert_ok;

const OWNER_X: OwnerId = 1;
const OWNER_Y: OwnerId = 2;

fn test_config() -> Config {
    Config {
        service: ServiceConfig {
            service_name: "event-ranking-service-test".to_string(),
        },
        database: DatabaseConfig {
            url: String::new(),
            max_connections: 1,
        },
        redis: RedisConfig {
            url: String::new(),
        },
        index: IndexConfig {
            seed: Some(42),
            ..Default::default()
        },
        recommendation: RecommendationConfig::default(),
        batch: BatchConfig::default(),
    }
}

fn event(
    id: EventId,
    title: &str,
    owner_id: OwnerId,
    reminders: i64,
    start_time: DateTime<Utc>,
    status: EventStatus,
) -> Candidate {
    Candidate {
        id,
        title: title.to_string(),
        description: "Come along".to_string(),
        interests: vec![Interest {
            id: 7,
            name: "culture".to_string(),
        }],
        owner_id,
        owner_name: format!("owner_{}", owner_id),
        owner_subscriber_count: 25,
        start_time,
        reminder_count: reminders,
        status,
    }
}

struct Harness {
    engine: EventRankingEngine,
    store: Arc<InMemorySnapshotStore>,
    viewers: Arc<InMemoryViewerSource>,
}

fn harness(events: Vec<Candidate>) -> Harness {
    let store = Arc::new(InMemorySnapshotStore::new());
    let viewers = Arc::new(InMemoryViewerSource::new());
    let engine = EventRankingEngine::new(
        &test_config(),
        Arc::new(InMemoryCandidateSource::new(events)),
        viewers.clone(),
        store.clone(),
        Arc::new(InMemoryCache::new()),
    )
    .with_jitter(Jitter::Disabled);

    Harness {
        engine,
        store,
        viewers,
    }
}

fn jazz_corpus(start: DateTime<Utc>) -> Vec<Candidate> {
    vec![
        event(1, "Jazz Night", OWNER_X, 10, start, EventStatus::Scheduled),
        event(2, "Jazz Evening", OWNER_X, 2, start, EventStatus::Scheduled),
        event(3, "Football Match", OWNER_Y, 1, start, EventStatus::Scheduled),
    ]
}

#[tokio::test]
async fn test_similar_events_follow_content() {
    let h = harness(jazz_corpus(Utc::now() + Duration::days(3)));

    let outcome = h.engine.trigger_batch_rebuild().await;
    assert!(matches!(outcome, RebuildOutcome::Published(_)));
    assert_eq!(outcome.candidates(), 3);

    let similar = h.engine.lookup_similar(1, 2).await;
    let ids: Vec<EventId> = similar.iter().map(|(id, _)| *id).collect();
    assert_eq!(ids, vec![2, 3]);
    assert!(similar[0].1 > similar[1].1);
    assert!(similar.iter().all(|(_, score)| (0.0..=1.0).contains(score)));

    let neighbors = h.engine.lookup(1, 2).await;
    assert_eq!(neighbors.source(), "ann");
}

#[tokio::test]
async fn test_lookup_never_returns_self_or_more_than_k() {
    let start = Utc::now() + Duration::days(1);
    let events: Vec<Candidate> = (1..=30)
        .map(|i| {
            let title = if i % 2 == 0 { "Indie Rock Show" } else { "Poetry Reading" };
            event(i, &format!("{} {}", title, i), i % 5, i, start, EventStatus::Scheduled)
        })
        .collect();
    let h = harness(events);
    assert!(h.engine.trigger_batch_rebuild().await.is_success());

    for id in 1..=30 {
        let similar = h.engine.lookup_similar(id, 4).await;
        assert!(similar.len() <= 4);
        assert!(similar.iter().all(|(other, _)| *other != id));
    }
}

#[tokio::test]
async fn test_lookup_before_any_rebuild_is_empty() {
    let h = harness(jazz_corpus(Utc::now() + Duration::days(3)));
    assert!(h.engine.lookup_similar(1, 5).await.is_empty());
}

#[tokio::test]
async fn test_rebuild_twice_replaces_snapshot_one_to_one() {
    let h = harness(jazz_corpus(Utc::now() + Duration::days(3)));

    assert!(h.engine.trigger_batch_rebuild().await.is_success());
    let first = assert_ok!(h.store.current_snapshot().await).unwrap();
    let first_edges: HashMap<(EventId, EventId), f64> = h
        .store
        .edges()
        .iter()
        .map(|e| ((e.source_id, e.target_id), e.final_score))
        .collect();

    assert!(h.engine.trigger_batch_rebuild().await.is_success());
    let second = assert_ok!(h.store.current_snapshot().await).unwrap();

    assert_ne!(first.id, second.id);
    assert_eq!(h.store.current_count(), 1);

    let first_ids: HashSet<EventId> = first.event_ids.iter().copied().collect();
    let second_ids: HashSet<EventId> = second.event_ids.iter().copied().collect();
    assert_eq!(first_ids, second_ids);

    let second_edges = h.store.edges();
    assert_eq!(second_edges.len(), first_edges.len());
    for edge in second_edges {
        let before = first_edges[&(edge.source_id, edge.target_id)];
        assert!((before - edge.final_score).abs() < 1e-6);
    }
}

#[tokio::test]
async fn test_live_reminder_leads_and_subscription_lifts_owner() {
    let now = Utc::now();
    let start = now + Duration::days(2);
    let h = harness(vec![
        event(1, "Jazz Night", OWNER_X, 10, now - Duration::minutes(30), EventStatus::Live),
        event(2, "Jazz Evening", OWNER_X, 2, start, EventStatus::Scheduled),
        event(3, "Football Match", OWNER_Y, 2, start, EventStatus::Scheduled),
    ]);
    assert!(h.engine.trigger_batch_rebuild().await.is_success());

    h.viewers.insert(ViewerContext {
        viewer_id: 77,
        interest_ids: HashSet::new(),
        followed_owner_ids: [OWNER_X].into_iter().collect(),
        reminder_event_ids: vec![1],
    });

    let ranked = h.engine.recommend(77, None, Utc::now()).await;
    let ids: Vec<EventId> = ranked.iter().map(|e| e.event_id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert_eq!(ranked[0].segment, Segment::Live);
}

#[tokio::test]
async fn test_similarity_to_reminded_event_lifts_followed_owner() {
    let h = harness(jazz_corpus(Utc::now() + Duration::days(2)));
    assert!(h.engine.trigger_batch_rebuild().await.is_success());

    let follows_x = [OWNER_X].into_iter().collect::<HashSet<OwnerId>>();
    let reminded = ViewerContext {
        viewer_id: 78,
        interest_ids: HashSet::new(),
        followed_owner_ids: follows_x.clone(),
        reminder_event_ids: vec![1],
    };
    let follower_only = ViewerContext {
        viewer_id: 79,
        interest_ids: HashSet::new(),
        followed_owner_ids: follows_x,
        reminder_event_ids: Vec::new(),
    };

    let now = Utc::now();
    let with_reminder = h.engine.recommend_for(&reminded, None, now).await;
    let without_reminder = h.engine.recommend_for(&follower_only, None, now).await;

    let score = |ranked: &[RankedEvent], id: EventId| {
        ranked
            .iter()
            .find(|e| e.event_id == id)
            .map(|e| e.score)
            .unwrap()
    };

    let ids: Vec<EventId> = with_reminder.iter().map(|e| e.event_id).collect();
    let pos_b = ids.iter().position(|&id| id == 2).unwrap();
    let pos_c = ids.iter().position(|&id| id == 3).unwrap();
    assert!(pos_b < pos_c);

    let boost_b = score(&with_reminder, 2) - score(&without_reminder, 2);
    let boost_c = score(&with_reminder, 3) - score(&without_reminder, 3);
    assert!(boost_b > 0.0);
    assert!(boost_b > boost_c);
}

#[tokio::test]
async fn test_empty_profile_matches_trending() {
    let start = Utc::now() + Duration::hours(6);
    let h = harness(jazz_corpus(start));
    h.viewers.insert(ViewerContext {
        viewer_id: 5,
        ..Default::default()
    });

    let now = Utc::now();
    let recommended = h.engine.recommend(5, Some("culture"), now).await;
    let trending = h.engine.trending(Some("culture"), now).await;
    assert_eq!(recommended, trending);
    assert_eq!(recommended.len(), 3);
}

#[tokio::test]
async fn test_recommend_respects_owner_diversity() {
    let now = Utc::now();
    let events: Vec<Candidate> = (1..=120)
        .map(|i| {
            event(
                i,
                &format!("Workshop {}", i),
                (i % 24) as OwnerId,
                (i * 7) % 40,
                now + Duration::hours(1 + i),
                EventStatus::Scheduled,
            )
        })
        .collect();
    let h = harness(events);
    assert!(h.engine.trigger_batch_rebuild().await.is_success());

    h.viewers.insert(ViewerContext {
        viewer_id: 9,
        interest_ids: [7].into_iter().collect(),
        followed_owner_ids: [3, 4].into_iter().collect(),
        reminder_event_ids: vec![10, 11, 12],
    });

    let ranked = h.engine.recommend(9, None, Utc::now()).await;
    assert_eq!(ranked.len(), 50);

    let unique: HashSet<EventId> = ranked.iter().map(|e| e.event_id).collect();
    assert_eq!(unique.len(), ranked.len());

    let mut per_owner: HashMap<OwnerId, usize> = HashMap::new();
    for entry in ranked.iter().take(40) {
        *per_owner.entry(entry.owner_id).or_insert(0) += 1;
    }
    assert!(per_owner.values().all(|&n| n <= 3));
}

#[tokio::test]
async fn test_single_candidate_skips_rebuild() {
    let h = harness(vec![event(
        1,
        "Lonely Gig",
        OWNER_X,
        0,
        Utc::now() + Duration::days(1),
        EventStatus::Scheduled,
    )]);

    let outcome = h.engine.trigger_batch_rebuild().await;
    assert!(matches!(outcome, RebuildOutcome::Skipped { candidates: 1 }));
    assert!(assert_ok!(h.store.current_snapshot().await).is_none());
}

#[tokio::test]
async fn test_failed_publish_keeps_previous_snapshot() {
    let h = harness(jazz_corpus(Utc::now() + Duration::days(3)));
    assert!(h.engine.trigger_batch_rebuild().await.is_success());
    let before = assert_ok!(h.store.current_snapshot().await).unwrap();
    let edges_before = h.store.edges().len();

    h.store.fail_next_publish();
    let outcome = h.engine.trigger_batch_rebuild().await;
    assert!(matches!(outcome, RebuildOutcome::Failed { candidates: 3, .. }));

    let after = assert_ok!(h.store.current_snapshot().await).unwrap();
    assert_eq!(before.id, after.id);
    assert_eq!(h.store.current_count(), 1);
    assert_eq!(h.store.edges().len(), edges_before);

    let similar = h.engine.lookup_similar(1, 2).await;
    assert_eq!(similar.first().map(|(id, _)| *id), Some(2));
}
