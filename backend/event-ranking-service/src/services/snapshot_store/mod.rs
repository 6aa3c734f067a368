//! Persistence of published index snapshots and similarity edges
//!
//! A publish replaces the whole output of the previous batch run:
//! derived scores on the candidates, the current snapshot and the edge table.
//! Implementations must apply a publish as one all-or-nothing unit so readers
//! never observe zero or two current snapshots, or a half-written edge table.

mod memory;
mod postgres;

pub use memory::InMemorySnapshotStore;
pub use postgres::PostgresSnapshotStore;

use crate::error::Result;
use crate::models::{EventId, IndexSnapshot, PublishBatch, SimilarityEdge};
use async_trait::async_trait;

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Newest snapshot flagged current, if any
    async fn current_snapshot(&self) -> Result<Option<IndexSnapshot>>;

    /// Outgoing edges of `event_id` ordered by final score, highest first
    async fn top_edges(&self, event_id: EventId, limit: usize) -> Result<Vec<SimilarityEdge>>;

    /// Atomically publish one batch run; returns the new snapshot id
    async fn publish(&self, batch: PublishBatch) -> Result<i64>;
}
