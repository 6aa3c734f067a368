//! Similarity lookup over the published index snapshot
//!
//! Lookup order:
//! 1. current snapshot id from the shared cache; when it names a snapshot
//!    already deserialized in this process, that one is used as is
//! 2. otherwise the snapshot blob from the shared cache, else from the
//!    snapshot store (then written back to the cache with its id)
//! 3. ANN query by the candidate's slot in the snapshot
//! 4. otherwise the persisted edge table
//!
//! Warm lookups only read the small id entry, so the blob crosses the cache
//! once per process per snapshot.
//!
//! Lookups never fail. A missing snapshot, an unindexed candidate or any
//! error on the ANN path falls back to the edge table, and an edge table
//! failure yields an empty list.
//!
//! A deserialized snapshot is shared as `Arc<LoadedSnapshot>` and never
//! mutated. A newer snapshot gets its own entry, keyed by snapshot id.

use crate::error::Result;
use crate::models::{EventId, IndexSnapshot, SimilarHit, SimilarNeighbors};
use crate::services::ann::AngularForest;
use crate::services::cache::KvCache;
use crate::services::snapshot_store::SnapshotStore;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Cache key of the current snapshot
pub const SNAPSHOT_CACHE_KEY: &str = "event_similarity:ann_index";

/// Cache key of the current snapshot's id
pub const SNAPSHOT_ID_CACHE_KEY: &str = "event_similarity:ann_index_id";

/// Cache representation of a snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedSnapshot {
    pub snapshot_id: i64,
    pub index_blob: Vec<u8>,
    pub event_ids: Vec<EventId>,
    pub vector_size: usize,
    pub created_at: DateTime<Utc>,
    pub event_count: usize,
}

impl From<IndexSnapshot> for CachedSnapshot {
    fn from(snapshot: IndexSnapshot) -> Self {
        Self {
            snapshot_id: snapshot.id,
            event_count: snapshot.event_ids.len(),
            index_blob: snapshot.index_blob,
            event_ids: snapshot.event_ids,
            vector_size: snapshot.vector_size,
            created_at: snapshot.created_at,
        }
    }
}

/// A snapshot with its forest deserialized, ready to query
#[derive(Debug)]
pub struct LoadedSnapshot {
    pub snapshot_id: i64,
    pub created_at: DateTime<Utc>,
    pub vector_size: usize,
    event_ids: Vec<EventId>,
    slots: HashMap<EventId, usize>,
    forest: AngularForest,
}

impl LoadedSnapshot {
    pub fn from_cached(cached: CachedSnapshot) -> Result<Self> {
        let forest = AngularForest::from_bytes(&cached.index_blob)?;
        let slots = cached
            .event_ids
            .iter()
            .enumerate()
            .map(|(slot, id)| (*id, slot))
            .collect();

        Ok(Self {
            snapshot_id: cached.snapshot_id,
            created_at: cached.created_at,
            vector_size: cached.vector_size,
            event_ids: cached.event_ids,
            slots,
            forest,
        })
    }

    pub fn contains(&self, event_id: EventId) -> bool {
        self.slots.contains_key(&event_id)
    }

    pub fn len(&self) -> usize {
        self.event_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.event_ids.is_empty()
    }

    /// ANN neighbors of an indexed event, `None` when the event is not indexed
    fn neighbors(&self, event_id: EventId, k: usize) -> Result<Option<Vec<SimilarHit>>> {
        let slot = match self.slots.get(&event_id) {
            Some(slot) => *slot,
            None => return Ok(None),
        };

        let hits = self
            .forest
            .nearest_by_item(slot, k + 1)?
            .into_iter()
            .filter(|(idx, _)| *idx != slot && *idx < self.event_ids.len())
            .map(|(idx, distance)| SimilarHit {
                event_id: self.event_ids[idx],
                score: (1.0 - f64::from(distance) / 2.0).clamp(0.0, 1.0),
            })
            .take(k)
            .collect();

        Ok(Some(hits))
    }
}

pub struct SimilarityService {
    store: Arc<dyn SnapshotStore>,
    cache: Arc<dyn KvCache>,
    snapshot_ttl: Duration,
    loaded: DashMap<i64, Arc<LoadedSnapshot>>,
}

impl SimilarityService {
    pub fn new(
        store: Arc<dyn SnapshotStore>,
        cache: Arc<dyn KvCache>,
        snapshot_ttl: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            snapshot_ttl,
            loaded: DashMap::new(),
        }
    }

    /// Up to `k` neighbors of `event_id`, tagged with the path that served them
    pub async fn lookup(&self, event_id: EventId, k: usize) -> SimilarNeighbors {
        match self.ann_neighbors(event_id, k).await {
            Ok(Some(hits)) => return SimilarNeighbors::Ann(hits),
            Ok(None) => {
                debug!(event_id = event_id, "No ANN entry, using edge table");
            }
            Err(e) => {
                warn!(event_id = event_id, error = %e, "ANN lookup failed, using edge table");
            }
        }

        SimilarNeighbors::EdgeTable(self.edge_neighbors(event_id, k).await)
    }

    /// `(other_id, score)` pairs, highest first, self excluded
    pub async fn lookup_similar(&self, event_id: EventId, k: usize) -> Vec<(EventId, f64)> {
        self.lookup(event_id, k)
            .await
            .into_hits()
            .into_iter()
            .map(|hit| (hit.event_id, hit.score))
            .collect()
    }

    /// The snapshot lookups are currently served from, loading it if needed
    pub async fn current_snapshot(&self) -> Result<Option<Arc<LoadedSnapshot>>> {
        if let Some(snapshot_id) = self.cached_snapshot_id().await {
            if let Some(loaded) = self.loaded.get(&snapshot_id) {
                return Ok(Some(Arc::clone(loaded.value())));
            }
        }

        if let Some(cached) = self.cached_snapshot().await {
            self.cache_snapshot_id(cached.snapshot_id).await;
            return self.materialize(cached).map(Some);
        }

        let snapshot = match self.store.current_snapshot().await? {
            Some(snapshot) => snapshot,
            None => {
                info!("No current index snapshot published");
                return Ok(None);
            }
        };

        let cached = CachedSnapshot::from(snapshot);
        match bincode::serialize(&cached) {
            Ok(bytes) => {
                if let Err(e) = self
                    .cache
                    .set(SNAPSHOT_CACHE_KEY, bytes, self.snapshot_ttl)
                    .await
                {
                    warn!(error = %e, "Failed to cache index snapshot");
                }
            }
            Err(e) => warn!(error = %e, "Failed to encode index snapshot for cache"),
        }
        self.cache_snapshot_id(cached.snapshot_id).await;

        info!(
            snapshot_id = cached.snapshot_id,
            event_count = cached.event_count,
            vector_size = cached.vector_size,
            "Loaded index snapshot from store"
        );
        self.materialize(cached).map(Some)
    }

    async fn ann_neighbors(&self, event_id: EventId, k: usize) -> Result<Option<Vec<SimilarHit>>> {
        match self.current_snapshot().await? {
            Some(snapshot) => snapshot.neighbors(event_id, k),
            None => Ok(None),
        }
    }

    async fn cached_snapshot_id(&self) -> Option<i64> {
        match self.cache.get(SNAPSHOT_ID_CACHE_KEY).await {
            Ok(Some(bytes)) => bincode::deserialize::<i64>(&bytes).ok(),
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "Snapshot id cache read failed");
                None
            }
        }
    }

    async fn cache_snapshot_id(&self, snapshot_id: i64) {
        let bytes = match bincode::serialize(&snapshot_id) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "Failed to encode snapshot id for cache");
                return;
            }
        };
        if let Err(e) = self
            .cache
            .set(SNAPSHOT_ID_CACHE_KEY, bytes, self.snapshot_ttl)
            .await
        {
            warn!(error = %e, "Failed to cache snapshot id");
        }
    }

    /// A cache read failure or an undecodable entry counts as a miss
    async fn cached_snapshot(&self) -> Option<CachedSnapshot> {
        let bytes = match self.cache.get(SNAPSHOT_CACHE_KEY).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "Snapshot cache read failed");
                return None;
            }
        };

        match bincode::deserialize::<CachedSnapshot>(&bytes) {
            Ok(cached) => Some(cached),
            Err(e) => {
                warn!(error = %e, "Discarding undecodable cached snapshot");
                None
            }
        }
    }

    fn materialize(&self, cached: CachedSnapshot) -> Result<Arc<LoadedSnapshot>> {
        if let Some(loaded) = self.loaded.get(&cached.snapshot_id) {
            return Ok(Arc::clone(loaded.value()));
        }

        let snapshot_id = cached.snapshot_id;
        let loaded = Arc::new(LoadedSnapshot::from_cached(cached)?);

        // Older snapshots stay alive only through Arcs already handed out
        self.loaded.retain(|id, _| *id == snapshot_id);
        self.loaded.insert(snapshot_id, Arc::clone(&loaded));

        debug!(snapshot_id = snapshot_id, items = loaded.len(), "Deserialized ANN forest");
        Ok(loaded)
    }

    async fn edge_neighbors(&self, event_id: EventId, k: usize) -> Vec<SimilarHit> {
        match self.store.top_edges(event_id, k).await {
            Ok(edges) => edges
                .into_iter()
                .filter(|edge| edge.target_id != event_id)
                .map(|edge| SimilarHit {
                    event_id: edge.target_id,
                    score: edge.final_score,
                })
                .take(k)
                .collect(),
            Err(e) => {
                warn!(event_id = event_id, error = %e, "Edge table lookup failed");
                Vec::new()
            }
        }
    }
}
