//! Per-provider poll algorithms: fetch, filter, ingest, advance watermarks.

pub mod spotify;
pub mod youtube;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::Subscription;
use crate::ingestion::IngestionDeps;
use crate::kv::Kv;
use crate::store::SubscriptionStore;
use crate::time::Clock;
use crate::types::{SubscriptionId, UserId};
use crate::Result;

/// Outcome of polling one subscription.
#[derive(Debug, Clone, Default)]
pub struct PollOutcome {
    pub new_items: u32,
    pub disconnected: bool,
}

/// Shared dependencies every poller needs, independent of provider. Every
/// field is an `Arc` (directly or transitively), so cloning is cheap —
/// pollers that fan out concurrent fetches clone a context per task rather
/// than fight its lifetime across a `tokio::spawn` boundary.
#[derive(Clone)]
pub struct PollContext {
    pub ingestion: IngestionDeps,
    pub subscriptions: Arc<dyn SubscriptionStore>,
    pub kv: Arc<dyn Kv>,
    pub clock: Arc<dyn Clock>,
}

/// Common interface the scheduler dispatches through. `poll_batch`'s
/// default implementation just loops `poll_single`; providers that can do
/// better (YouTube's shared video-details call, Spotify's shared show
/// lookup) override it.
#[async_trait]
pub trait Poller: Send + Sync {
    async fn poll_single(
        &self,
        ctx: &PollContext,
        user_id: UserId,
        access_token: &str,
        sub: &Subscription,
    ) -> Result<PollOutcome>;

    async fn poll_batch(
        &self,
        ctx: &PollContext,
        user_id: UserId,
        access_token: &str,
        subs: &[Subscription],
    ) -> HashMap<SubscriptionId, Result<PollOutcome>> {
        let mut out = HashMap::with_capacity(subs.len());
        for sub in subs {
            let result = self.poll_single(ctx, user_id, access_token, sub).await;
            out.insert(sub.id, result);
        }
        out
    }
}
