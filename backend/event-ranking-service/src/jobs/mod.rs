// ============================================
// Background Jobs Module
// ============================================
//
// Contains the index rebuild job:
// 1. Vectorize eligible events
// 2. Build the ANN snapshot and the similarity edge table
// 3. Publish both atomically
//
// Triggered via:
// - CronJob (Kubernetes) with --mode rebuild
// - Long-running scheduler with --mode schedule
// - Library call (EventRankingEngine::trigger_batch_rebuild)

pub mod index_rebuild;

pub use index_rebuild::{
    build_index_artifacts, BuildTimings, IndexArtifacts, IndexRebuildJob, RebuildOutcome,
    RebuildStats,
};
