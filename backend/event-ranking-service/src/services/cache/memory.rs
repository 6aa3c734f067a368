use super::KvCache;
use crate::error::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

impl Entry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// In-process cache backed by DashMap
///
/// Expired entries are evicted lazily on read.
#[derive(Debug, Default)]
pub struct InMemoryCache {
    store: DashMap<String, Entry>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.store
            .get(key)
            .map(|entry| !entry.is_expired())
            .unwrap_or(false)
    }
}

#[async_trait]
impl KvCache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if let Some(entry) = self.store.get(key) {
            if !entry.is_expired() {
                return Ok(Some(entry.value.clone()));
            }
        } else {
            return Ok(None);
        }

        // Expired: the read guard is released above before removal
        self.store.remove(key);
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        self.store.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.store.remove(key);
        Ok(())
    }
}
