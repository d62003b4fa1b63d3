//! The distributed lock / rate-limit-counter / small-cache contract.
//!
//! Production deployments back this with Redis or similar; the in-memory
//! implementation here is what the scheduler, health monitor, and Spotify
//! poller all use in tests. One `Kv` instance backs all three KV-shaped
//! concerns (lock, counter, cache) because that's how the deployment
//! actually provisions it — a single keyspace, not three services.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::time::{Clock, Timestamp};
use crate::Result;

#[async_trait]
pub trait Kv: Send + Sync {
    /// Acquires a lock at `key` for `ttl_millis`. Returns `true` if this
    /// call acquired it, `false` if it's already held and unexpired.
    async fn try_lock(&self, key: &str, ttl_millis: i64) -> Result<bool>;

    /// Releases a lock this process is assumed to hold. A no-op if absent.
    async fn unlock(&self, key: &str) -> Result<()>;

    /// Increments a counter at `key`, creating it with the given TTL if
    /// absent, and returns the post-increment value.
    async fn counter_incr(&self, key: &str, ttl_millis: i64) -> Result<u64>;

    /// Resets a counter to zero (or removes it).
    async fn counter_reset(&self, key: &str) -> Result<()>;

    async fn cache_get(&self, key: &str) -> Result<Option<String>>;

    async fn cache_set(&self, key: &str, value: String, ttl_millis: i64) -> Result<()>;

    async fn cache_invalidate(&self, key: &str) -> Result<()>;
}

struct Entry<T> {
    value: T,
    expires_at: Timestamp,
}

/// In-memory `Kv`. Not shared across processes — fine for tests and a
/// single-replica deployment, exactly the scope this crate claims for its
/// reference implementations.
pub struct InMemoryKv {
    clock: std::sync::Arc<dyn Clock>,
    locks: Mutex<HashMap<String, Timestamp>>,
    counters: Mutex<HashMap<String, Entry<u64>>>,
    cache: Mutex<HashMap<String, Entry<String>>>,
}

impl InMemoryKv {
    #[must_use]
    pub fn new(clock: std::sync::Arc<dyn Clock>) -> Self {
        Self {
            clock,
            locks: Mutex::new(HashMap::new()),
            counters: Mutex::new(HashMap::new()),
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn now(&self) -> Timestamp {
        self.clock.now_millis()
    }
}

#[async_trait]
impl Kv for InMemoryKv {
    async fn try_lock(&self, key: &str, ttl_millis: i64) -> Result<bool> {
        let now = self.now();
        let mut locks = self.locks.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(expires_at) = locks.get(key) {
            if *expires_at > now {
                return Ok(false);
            }
        }
        locks.insert(key.to_owned(), now + ttl_millis);
        Ok(true)
    }

    async fn unlock(&self, key: &str) -> Result<()> {
        let mut locks = self.locks.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        locks.remove(key);
        Ok(())
    }

    async fn counter_incr(&self, key: &str, ttl_millis: i64) -> Result<u64> {
        let now = self.now();
        let mut counters = self.counters.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let entry = counters.entry(key.to_owned()).or_insert(Entry {
            value: 0,
            expires_at: now + ttl_millis,
        });
        if entry.expires_at <= now {
            entry.value = 0;
            entry.expires_at = now + ttl_millis;
        }
        entry.value += 1;
        Ok(entry.value)
    }

    async fn counter_reset(&self, key: &str) -> Result<()> {
        let mut counters = self.counters.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        counters.remove(key);
        Ok(())
    }

    async fn cache_get(&self, key: &str) -> Result<Option<String>> {
        let now = self.now();
        let cache = self.cache.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(cache.get(key).filter(|e| e.expires_at > now).map(|e| e.value.clone()))
    }

    async fn cache_set(&self, key: &str, value: String, ttl_millis: i64) -> Result<()> {
        let now = self.now();
        let mut cache = self.cache.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        cache.insert(
            key.to_owned(),
            Entry {
                value,
                expires_at: now + ttl_millis,
            },
        );
        Ok(())
    }

    async fn cache_invalidate(&self, key: &str) -> Result<()> {
        let mut cache = self.cache.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        cache.remove(key);
        Ok(())
    }
}
