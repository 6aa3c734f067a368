use super::SnapshotStore;
use crate::error::{AppError, Result};
use crate::models::{DerivedScores, EventId, IndexSnapshot, PublishBatch, SimilarityEdge};
use crate::utils::cmp_desc;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct State {
    snapshots: Vec<IndexSnapshot>,
    edges: Vec<SimilarityEdge>,
    scores: HashMap<EventId, DerivedScores>,
    next_id: i64,
}

/// Snapshot store held in process memory
///
/// A publish builds the next state off to the side and swaps it in under the
/// lock, so a failed publish leaves the previous state untouched.
#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    state: Mutex<State>,
    fail_next_publish: AtomicBool,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make the next `publish` fail before anything is applied
    pub fn fail_next_publish(&self) {
        self.fail_next_publish.store(true, Ordering::SeqCst);
    }

    pub fn snapshots(&self) -> Vec<IndexSnapshot> {
        self.lock().snapshots.clone()
    }

    pub fn current_count(&self) -> usize {
        self.lock().snapshots.iter().filter(|s| s.is_current).count()
    }

    pub fn edges(&self) -> Vec<SimilarityEdge> {
        self.lock().edges.clone()
    }

    pub fn derived_scores(&self, event_id: EventId) -> Option<DerivedScores> {
        self.lock().scores.get(&event_id).cloned()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn current_snapshot(&self) -> Result<Option<IndexSnapshot>> {
        let state = self.lock();
        Ok(state
            .snapshots
            .iter()
            .filter(|s| s.is_current)
            .max_by_key(|s| (s.created_at, s.id))
            .cloned())
    }

    async fn top_edges(&self, event_id: EventId, limit: usize) -> Result<Vec<SimilarityEdge>> {
        let state = self.lock();
        let mut edges: Vec<SimilarityEdge> = state
            .edges
            .iter()
            .filter(|e| e.source_id == event_id)
            .cloned()
            .collect();
        edges.sort_by(|a, b| cmp_desc(a.final_score, b.final_score));
        edges.truncate(limit);
        Ok(edges)
    }

    async fn publish(&self, batch: PublishBatch) -> Result<i64> {
        if self.fail_next_publish.swap(false, Ordering::SeqCst) {
            return Err(AppError::Persistence("simulated publish failure".to_string()));
        }

        let mut state = self.lock();
        let snapshot_id = state.next_id + 1;

        let mut snapshots: Vec<IndexSnapshot> = state
            .snapshots
            .iter()
            .filter(|s| s.is_current)
            .cloned()
            .collect();
        for snapshot in snapshots.iter_mut() {
            snapshot.is_current = false;
        }
        snapshots.push(IndexSnapshot {
            id: snapshot_id,
            index_blob: batch.snapshot.index_blob,
            event_ids: batch.snapshot.event_ids,
            vector_size: batch.snapshot.vector_size,
            created_at: batch.snapshot.created_at,
            is_current: true,
        });

        let mut scores = state.scores.clone();
        for derived in batch.scores {
            scores.insert(derived.event_id, derived);
        }

        state.snapshots = snapshots;
        state.edges = batch.edges;
        state.scores = scores;
        state.next_id = snapshot_id;

        Ok(snapshot_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewIndexSnapshot;
    use chrono::Utc;

    fn batch(event_ids: Vec<EventId>, edges: Vec<SimilarityEdge>) -> PublishBatch {
        PublishBatch {
            scores: vec![],
            snapshot: NewIndexSnapshot {
                index_blob: vec![1, 2, 3],
                event_ids,
                vector_size: 4,
                created_at: Utc::now(),
            },
            edges,
        }
    }

    fn edge(source: EventId, target: EventId, final_score: f64) -> SimilarityEdge {
        SimilarityEdge {
            source_id: source,
            target_id: target,
            similarity_score: final_score,
            engagement_boost: 0.0,
            final_score,
        }
    }

    #[tokio::test]
    async fn test_publish_keeps_single_current_snapshot() {
        let store = InMemorySnapshotStore::new();
        let first = store.publish(batch(vec![1, 2], vec![])).await.unwrap();
        let second = store.publish(batch(vec![1, 2, 3], vec![])).await.unwrap();

        assert_ne!(first, second);
        assert_eq!(store.current_count(), 1);
        assert_eq!(store.snapshots().len(), 2);

        let current = store.current_snapshot().await.unwrap().unwrap();
        assert_eq!(current.id, second);
        assert_eq!(current.event_ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_publish_prunes_snapshots_older_than_previous() {
        let store = InMemorySnapshotStore::new();
        store.publish(batch(vec![1, 2], vec![])).await.unwrap();
        let second = store.publish(batch(vec![1, 3], vec![])).await.unwrap();
        let third = store.publish(batch(vec![2, 3], vec![])).await.unwrap();

        let ids: Vec<i64> = store.snapshots().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![second, third]);
        assert_eq!(store.current_count(), 1);
        assert_eq!(store.current_snapshot().await.unwrap().unwrap().id, third);
    }

    #[tokio::test]
    async fn test_publish_replaces_edges_wholesale() {
        let store = InMemorySnapshotStore::new();
        store
            .publish(batch(vec![1, 2], vec![edge(1, 2, 0.4), edge(2, 1, 0.4)]))
            .await
            .unwrap();
        store
            .publish(batch(vec![1, 3], vec![edge(1, 3, 0.9)]))
            .await
            .unwrap();

        let edges = store.edges();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].target_id, 3);
    }

    #[tokio::test]
    async fn test_failed_publish_leaves_previous_state() {
        let store = InMemorySnapshotStore::new();
        let first = store
            .publish(batch(vec![1, 2], vec![edge(1, 2, 0.5)]))
            .await
            .unwrap();

        store.fail_next_publish();
        let err = store
            .publish(batch(vec![7, 8], vec![edge(7, 8, 0.9)]))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Persistence(_)));

        let current = store.current_snapshot().await.unwrap().unwrap();
        assert_eq!(current.id, first);
        assert_eq!(store.edges(), vec![edge(1, 2, 0.5)]);
    }

    #[tokio::test]
    async fn test_top_edges_ordered_and_limited() {
        let store = InMemorySnapshotStore::new();
        store
            .publish(batch(
                vec![1, 2, 3, 4],
                vec![edge(1, 2, 0.2), edge(1, 3, 0.8), edge(1, 4, 0.5), edge(2, 1, 0.9)],
            ))
            .await
            .unwrap();

        let edges = store.top_edges(1, 2).await.unwrap();
        let targets: Vec<EventId> = edges.iter().map(|e| e.target_id).collect();
        assert_eq!(targets, vec![3, 4]);
    }
}
