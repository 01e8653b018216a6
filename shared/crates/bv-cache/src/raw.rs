//! `RawCache`: the minimal byte-oriented cache operations the evidence
//! cache and idempotency store are built on, with a Redis implementation
//! and an in-memory fake for tests (spec.md §4.4/§7).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bv_common::error::BvError;

#[async_trait::async_trait]
pub trait RawCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BvError>;
    async fn setex(&self, key: &str, ttl: Duration, value: Vec<u8>) -> Result<(), BvError>;
    async fn del(&self, key: &str) -> Result<(), BvError>;
}

pub struct RedisCache {
    client: redis::Client,
}

impl RedisCache {
    pub fn new(redis_url: &str) -> Result<Self, BvError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| BvError::StorageUnavailable(format!("redis client: {e}")))?;
        Ok(RedisCache { client })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, BvError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| BvError::StorageUnavailable(format!("redis connect: {e}")))
    }
}

#[async_trait::async_trait]
impl RawCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BvError> {
        use redis::AsyncCommands;
        let mut conn = self.connection().await?;
        let value: Option<Vec<u8>> = conn
            .get(key)
            .await
            .map_err(|e| BvError::StorageUnavailable(format!("redis get: {e}")))?;
        Ok(value)
    }

    async fn setex(&self, key: &str, ttl: Duration, value: Vec<u8>) -> Result<(), BvError> {
        use redis::AsyncCommands;
        let mut conn = self.connection().await?;
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1))
            .await
            .map_err(|e| BvError::StorageUnavailable(format!("redis setex: {e}")))
    }

    async fn del(&self, key: &str) -> Result<(), BvError> {
        use redis::AsyncCommands;
        let mut conn = self.connection().await?;
        conn.del::<_, ()>(key)
            .await
            .map_err(|e| BvError::StorageUnavailable(format!("redis del: {e}")))
    }
}

#[derive(Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

/// In-memory stand-in for Redis, used in dev mode and tests. Honors TTL
/// expiry on read so cache-miss behaviour matches production.
#[derive(Clone, Default)]
pub struct MemoryCache {
    data: Arc<tokio::sync::RwLock<HashMap<String, Entry>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        MemoryCache::default()
    }
}

#[async_trait::async_trait]
impl RawCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BvError> {
        let mut data = self.data.write().await;
        match data.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.value.clone())),
            Some(_) => {
                data.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn setex(&self, key: &str, ttl: Duration, value: Vec<u8>) -> Result<(), BvError> {
        self.data.write().await.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), BvError> {
        self.data.write().await.remove(key);
        Ok(())
    }
}

/// Lets a type-erased cache handle (`Arc<dyn RawCache>`, as services wire up
/// at startup once they've picked Redis vs. the in-memory fake) satisfy the
/// generic `C: RawCache` bound that `EvidenceCache`/`swr` are built against.
#[async_trait::async_trait]
impl RawCache for std::sync::Arc<dyn RawCache> {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BvError> {
        self.as_ref().get(key).await
    }

    async fn setex(&self, key: &str, ttl: Duration, value: Vec<u8>) -> Result<(), BvError> {
        self.as_ref().setex(key, ttl, value).await
    }

    async fn del(&self, key: &str) -> Result<(), BvError> {
        self.as_ref().del(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_cache_expires_entries() {
        let cache = MemoryCache::new();
        cache
            .setex("k", Duration::from_millis(10), b"v".to_vec())
            .await
            .unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(b"v".to_vec()));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
    }
}
