//! Short-TTL key/value cache
//!
//! Two users share this seam:
//! - the similarity lookup caches the current index snapshot (TTL ~1 hour)
//! - the hybrid scorer caches ranked results per viewer and filter (TTL ~5 minutes)
//!
//! Values are opaque bytes; callers choose the encoding.

mod memory;
mod redis_cache;

pub use memory::InMemoryCache;
pub use redis_cache::RedisCache;

use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
pub trait KvCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;
}
