//! Per-`(provider, user)` outbound rate limiting.
//!
//! This is a thin token bucket, not a crate dependency, because none of
//! the corpus this crate is grounded on reaches for a rate-limiting crate;
//! the teacher's own provider clients rely on providers' own `Retry-After`
//! semantics and a hand-rolled backoff instead (see [`crate::auth`]).

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::time::Clock;
use crate::types::{Provider, UserId};
use crate::Result;

#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Returns `true` if a poll for `(provider, user_id)` may proceed right
    /// now, consuming one token if so.
    async fn allow(&self, provider: Provider, user_id: UserId) -> Result<bool>;
}

struct Bucket {
    tokens: f64,
    last_refill: i64,
}

/// Token bucket limiter: `capacity` tokens, refilled at `refill_per_sec`.
pub struct TokenBucketRateLimiter {
    clock: Arc<dyn Clock>,
    capacity: f64,
    refill_per_sec: f64,
    buckets: DashMap<(Provider, UserId), Bucket>,
}

impl TokenBucketRateLimiter {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, capacity: f64, refill_per_sec: f64) -> Self {
        Self {
            clock,
            capacity,
            refill_per_sec,
            buckets: DashMap::new(),
        }
    }
}

#[async_trait]
impl RateLimiter for TokenBucketRateLimiter {
    async fn allow(&self, provider: Provider, user_id: UserId) -> Result<bool> {
        let now = self.clock.now_millis();
        let mut bucket = self
            .buckets
            .entry((provider, user_id))
            .or_insert_with(|| Bucket {
                tokens: self.capacity,
                last_refill: now,
            });
        let elapsed_secs = (now - bucket.last_refill).max(0) as f64 / 1_000.0;
        bucket.tokens = (bucket.tokens + elapsed_secs * self.refill_per_sec).min(self.capacity);
        bucket.last_refill = now;
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}
