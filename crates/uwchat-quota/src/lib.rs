use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{instrument, warn};
use uwchat_error::{ChatError, Result};

mod redis_store;
pub use redis_store::RedisCounterStore;

/// Requests allowed per client key within one window.
pub const DAILY_LIMIT: u32 = 100;
/// Rolling window length: 24 hours.
pub const WINDOW_SECS: u64 = 24 * 60 * 60;

/// Narrow contract over the external key-value counter store: read, atomic
/// increment, expiry-set, and delete. The window resets implicitly when the
/// key expires.
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<i64>>;
    async fn increment(&self, key: &str) -> Result<i64>;
    async fn expire_in(&self, key: &str, ttl_secs: u64) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
}

/// Rolling daily quota per client key.
///
/// Increment and expiry-set are two operations against the shared store, so
/// concurrent requests from one client can transiently overshoot the limit
/// by the number of in-flight requests at the boundary. Accepted bound.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    limit: u32,
    window_secs: u64,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self {
            store,
            limit: DAILY_LIMIT,
            window_secs: WINDOW_SECS,
        }
    }

    pub fn with_limits(store: Arc<dyn CounterStore>, limit: u32, window_secs: u64) -> Self {
        Self {
            store,
            limit,
            window_secs,
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Reject without incrementing when the count is already at the limit;
    /// otherwise increment atomically and, only on the first increment of a
    /// window, start the expiry clock. Returns the remaining allowance.
    ///
    /// If the expiry-set fails, the key is dropped again: a counter with no
    /// deadline would never reset and would lock the client out permanently
    /// once it reached the limit.
    #[instrument(skip(self))]
    pub async fn check_and_increment(&self, key: &str) -> Result<u32> {
        let count = self.store.get(key).await?.unwrap_or(0);
        if count >= self.limit as i64 {
            return Err(ChatError::QuotaExceeded { limit: self.limit });
        }

        let new_count = self.store.increment(key).await?;
        if new_count == 1 {
            if let Err(expire_err) = self.store.expire_in(key, self.window_secs).await {
                if let Err(remove_err) = self.store.remove(key).await {
                    warn!(key, error = %remove_err, "could not drop counter after failed expiry");
                }
                return Err(expire_err);
            }
        }

        Ok((self.limit as i64 - new_count).max(0) as u32)
    }

    /// Read-only remaining allowance; full limit for unseen keys.
    pub async fn remaining(&self, key: &str) -> Result<u32> {
        let count = self.store.get(key).await?.unwrap_or(0);
        Ok((self.limit as i64 - count).max(0) as u32)
    }
}

/// In-process counter store for tests and Redis-less development.
#[derive(Default)]
pub struct MemoryCounterStore {
    counters: RwLock<HashMap<String, Counter>>,
}

struct Counter {
    count: i64,
    deadline: Option<Instant>,
}

impl Counter {
    fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn get(&self, key: &str) -> Result<Option<i64>> {
        let mut counters = self.counters.write().await;
        match counters.get(key) {
            Some(c) if c.is_expired() => {
                counters.remove(key);
                Ok(None)
            }
            Some(c) => Ok(Some(c.count)),
            None => Ok(None),
        }
    }

    async fn increment(&self, key: &str) -> Result<i64> {
        let mut counters = self.counters.write().await;
        let counter = counters.entry(key.to_string()).or_insert(Counter {
            count: 0,
            deadline: None,
        });
        if counter.is_expired() {
            counter.count = 0;
            counter.deadline = None;
        }
        counter.count += 1;
        Ok(counter.count)
    }

    async fn expire_in(&self, key: &str, ttl_secs: u64) -> Result<()> {
        let mut counters = self.counters.write().await;
        if let Some(counter) = counters.get_mut(key) {
            counter.deadline = Some(Instant::now() + Duration::from_secs(ttl_secs));
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut counters = self.counters.write().await;
        counters.remove(key);
        Ok(())
    }
}
