pub mod ann;
pub mod cache;
pub mod scoring;
pub mod similarity;
pub mod snapshot_store;
pub mod sources;
pub mod vectorizer;

pub use cache::{InMemoryCache, KvCache, RedisCache};
pub use scoring::{HybridScorer, Jitter};
pub use similarity::SimilarityService;
pub use snapshot_store::{InMemorySnapshotStore, PostgresSnapshotStore, SnapshotStore};
pub use sources::{
    CandidateSource, InMemoryCandidateSource, InMemoryViewerSource, PostgresCandidateSource,
    PostgresViewerSource, ViewerSource,
};
pub use vectorizer::TfidfVectorizer;
