use async_trait::async_trait;
use redis::{AsyncCommands, Client as RedisClient};
use uwchat_error::{ChatError, Result};

use crate::CounterStore;

/// Redis-backed counter store. INCR gives the atomic increment; EXPIRE on
/// the first increment starts the window; key expiry is the implicit reset.
pub struct RedisCounterStore {
    client: RedisClient,
}

impl RedisCounterStore {
    pub fn new(redis_url: &str) -> Result<Self> {
        let client = RedisClient::open(redis_url).map_err(|e| ChatError::Configuration {
            key: "redis_url".to_string(),
            reason: format!("failed to open Redis client: {}", e),
        })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn get(&self, key: &str) -> Result<Option<i64>> {
        let mut conn = self.client.get_async_connection().await?;
        let count: Option<i64> = conn.get(key).await?;
        Ok(count)
    }

    async fn increment(&self, key: &str) -> Result<i64> {
        let mut conn = self.client.get_async_connection().await?;
        let count: i64 = conn.incr(key, 1).await?;
        Ok(count)
    }

    async fn expire_in(&self, key: &str, ttl_secs: u64) -> Result<()> {
        let mut conn = self.client.get_async_connection().await?;
        let _: () = conn.expire(key, ttl_secs as usize).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut conn = self.client.get_async_connection().await?;
        let _: () = conn.del(key).await?;
        Ok(())
    }
}
