use super::KvCache;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::time::Duration;
use tracing::{debug, warn};

/// Shared cache backed by Redis
#[derive(Clone)]
pub struct RedisCache {
    manager: ConnectionManager,
    key_prefix: String,
}

impl RedisCache {
    pub async fn connect(redis_url: &str, key_prefix: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| AppError::Redis(format!("Failed to create Redis client: {}", e)))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| AppError::Redis(format!("Failed to create Redis connection: {}", e)))?;

        Ok(Self::new(manager, key_prefix))
    }

    pub fn new(manager: ConnectionManager, key_prefix: &str) -> Self {
        Self {
            manager,
            key_prefix: key_prefix.to_string(),
        }
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }
}

#[async_trait]
impl KvCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let key = self.key(key);
        let value: Option<Vec<u8>> = redis::cmd("GET")
            .arg(&key)
            .query_async(&mut self.manager.clone())
            .await
            .map_err(|e| {
                warn!("Redis GET failed for {}: {}", key, e);
                AppError::Redis(e.to_string())
            })?;

        debug!(key = %key, hit = value.is_some(), "Redis cache lookup");
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        let key = self.key(key);
        redis::cmd("SETEX")
            .arg(&key)
            .arg(ttl.as_secs().max(1))
            .arg(value)
            .query_async::<_, ()>(&mut self.manager.clone())
            .await
            .map_err(|e| {
                warn!("Redis SETEX failed for {}: {}", key, e);
                AppError::Redis(e.to_string())
            })?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let key = self.key(key);
        redis::cmd("DEL")
            .arg(&key)
            .query_async::<_, ()>(&mut self.manager.clone())
            .await
            .map_err(|e| {
                warn!("Redis DEL failed for {}: {}", key, e);
                AppError::Redis(e.to_string())
            })?;
        Ok(())
    }
}
