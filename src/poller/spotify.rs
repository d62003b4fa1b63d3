//! Podcast-show poller (PP-S).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::domain::Subscription;
use crate::ingestion::ingest_item;
use crate::provider::spotify::{self, ShowMetadata, SpotifyClient};
use crate::provider::DecodedItem;
use crate::types::{ContentType, Provider, SubscriptionId, SubscriptionStatus, UserId};
use crate::Result;

use super::{PollContext, PollOutcome, Poller};

const FETCH_COUNT: u32 = 10;
/// Default bound on concurrent per-show episode fetches; overridable via
/// `SPOTIFY_EPISODE_FETCH_CONCURRENCY`.
const DEFAULT_EPISODE_FETCH_CONCURRENCY: usize = 5;
const SHOW_CACHE_TTL_MILLIS: i64 = 15 * 60 * 1_000;

#[derive(serde::Serialize, serde::Deserialize)]
struct CachedShow {
    name: String,
    total_episodes: i64,
}

pub struct SpotifyPoller {
    client_factory: Arc<dyn Fn(String) -> SpotifyClient + Send + Sync>,
    episode_fetch_concurrency: usize,
}

impl SpotifyPoller {
    #[must_use]
    pub fn new(client_factory: Arc<dyn Fn(String) -> SpotifyClient + Send + Sync>) -> Self {
        Self {
            client_factory,
            episode_fetch_concurrency: DEFAULT_EPISODE_FETCH_CONCURRENCY,
        }
    }

    #[must_use]
    pub fn with_episode_fetch_concurrency(mut self, concurrency: usize) -> Self {
        self.episode_fetch_concurrency = concurrency.max(1);
        self
    }

    async fn disconnect_missing_show(&self, ctx: &PollContext, sub: &Subscription) -> Result<PollOutcome> {
        let now = ctx.clock.now_millis();
        let mut updated = sub.clone();
        updated.status = SubscriptionStatus::Disconnected;
        updated.disconnected_reason = Some("Show no longer available".to_owned());
        updated.disconnected_at = Some(now);
        updated.updated_at = now;
        ctx.subscriptions.update(updated).await?;
        invalidate_show_cache(ctx, &sub.provider_channel_id).await?;
        Ok(PollOutcome {
            new_items: 0,
            disconnected: true,
        })
    }
}

fn show_cache_key(show_id: &str) -> String {
    format!("spotify:show:{show_id}")
}

async fn cached_show(ctx: &PollContext, show_id: &str) -> Result<Option<ShowMetadata>> {
    let Some(raw) = ctx.kv.cache_get(&show_cache_key(show_id)).await? else {
        return Ok(None);
    };
    let cached: CachedShow = serde_json::from_str(&raw)?;
    Ok(Some(ShowMetadata {
        id: show_id.to_owned(),
        name: cached.name,
        total_episodes: cached.total_episodes,
        image_url: None,
    }))
}

async fn cache_show(ctx: &PollContext, show: &ShowMetadata) -> Result<()> {
    let encoded = serde_json::to_string(&CachedShow {
        name: show.name.clone(),
        total_episodes: show.total_episodes,
    })?;
    ctx.kv.cache_set(&show_cache_key(&show.id), encoded, SHOW_CACHE_TTL_MILLIS).await
}

async fn invalidate_show_cache(ctx: &PollContext, show_id: &str) -> Result<()> {
    ctx.kv.cache_invalidate(&show_cache_key(show_id)).await
}

/// Fetches and ingests one show's new episodes. Free function (not a
/// `SpotifyPoller` method) so `poll_batch` can run it inside a spawned task
/// without fighting `&self`'s lifetime.
#[allow(clippy::too_many_arguments)]
async fn process_one(
    ctx: &PollContext,
    client_factory: &Arc<dyn Fn(String) -> SpotifyClient + Send + Sync>,
    user_id: UserId,
    access_token: &str,
    sub: &Subscription,
    remote_total_episodes: i64,
) -> Result<PollOutcome> {
    let client = (client_factory)(access_token.to_owned());
    let raw_episodes = client.episodes(&sub.provider_channel_id, FETCH_COUNT).await?;
    let now = ctx.clock.now_millis();
    let decoded: Vec<DecodedItem> = raw_episodes
        .iter()
        .filter_map(|ep| spotify::decode(ep, now).ok())
        .collect();

    let selected = select_new_episodes(&decoded, sub.last_published_at);

    let mut new_items = 0u32;
    let mut newest_ingested_at: Option<i64> = None;
    for item in selected {
        let outcome = ingest_item(
            &ctx.ingestion,
            user_id,
            sub.id,
            Provider::Spotify,
            ContentType::Podcast,
            &sub.provider_channel_id,
            &sub.provider_channel_id,
            item.clone(),
        )
        .await;
        match outcome {
            Ok(outcome) if outcome.created => {
                new_items += 1;
                if let Some(published_at) = outcome.published_at {
                    newest_ingested_at = Some(newest_ingested_at.map_or(published_at, |cur| cur.max(published_at)));
                }
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(subscription_id = %sub.id, error = %err, "failed to ingest spotify episode");
            }
        }
    }

    let mut updated = sub.clone();
    updated.last_polled_at = Some(now);
    updated.updated_at = now;
    if newest_ingested_at.is_some() {
        updated.last_published_at = newest_ingested_at;
        updated.total_items = Some(remote_total_episodes);
    }
    ctx.subscriptions.update(updated).await?;

    if newest_ingested_at.is_some() {
        cache_show(
            ctx,
            &ShowMetadata {
                id: sub.provider_channel_id.clone(),
                name: String::new(),
                total_episodes: remote_total_episodes,
                image_url: None,
            },
        )
        .await?;
    }

    Ok(PollOutcome {
        new_items,
        disconnected: false,
    })
}

#[async_trait]
impl Poller for SpotifyPoller {
    async fn poll_single(
        &self,
        ctx: &PollContext,
        user_id: UserId,
        access_token: &str,
        sub: &Subscription,
    ) -> Result<PollOutcome> {
        let client = (self.client_factory)(access_token.to_owned());
        let shows = client.shows(std::slice::from_ref(&sub.provider_channel_id)).await?;
        let Some(show) = shows.get(&sub.provider_channel_id) else {
            return self.disconnect_missing_show(ctx, sub).await;
        };
        process_one(ctx, &self.client_factory, user_id, access_token, sub, show.total_episodes).await
    }

    async fn poll_batch(
        &self,
        ctx: &PollContext,
        user_id: UserId,
        access_token: &str,
        subs: &[Subscription],
    ) -> HashMap<SubscriptionId, Result<PollOutcome>> {
        let mut out = HashMap::with_capacity(subs.len());
        let client = (self.client_factory)(access_token.to_owned());

        let show_ids: Vec<String> = subs.iter().map(|s| s.provider_channel_id.clone()).collect();
        let shows = match client.shows(&show_ids).await {
            Ok(shows) => shows,
            Err(err) => {
                for sub in subs {
                    out.insert(sub.id, Err(clone_error(&err)));
                }
                return out;
            }
        };

        let mut needs_fetch = Vec::new();
        for sub in subs {
            let Some(show) = shows.get(&sub.provider_channel_id) else {
                out.insert(sub.id, self.disconnect_missing_show(ctx, sub).await);
                continue;
            };

            let cached = cached_show(ctx, &sub.provider_channel_id).await.ok().flatten();
            let cached_total = cached.map(|c| c.total_episodes);
            let remote_total = show.total_episodes;
            if sub.total_items == Some(remote_total) || cached_total == Some(remote_total) {
                let now = ctx.clock.now_millis();
                let mut updated = sub.clone();
                updated.last_polled_at = Some(now);
                updated.updated_at = now;
                out.insert(sub.id, ctx.subscriptions.update(updated).await.map(|_| PollOutcome::default()));
                continue;
            }
            needs_fetch.push((sub, remote_total));
        }

        // Bounded concurrent fetch: each task acquires its own permit, so up
        // to `episode_fetch_concurrency` shows are in flight at once instead
        // of one at a time.
        let semaphore = Arc::new(Semaphore::new(self.episode_fetch_concurrency));
        let mut tasks = JoinSet::new();
        for (sub, remote_total) in needs_fetch {
            let semaphore = Arc::clone(&semaphore);
            let ctx = ctx.clone();
            let client_factory = Arc::clone(&self.client_factory);
            let access_token = access_token.to_owned();
            let sub = sub.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let outcome = process_one(&ctx, &client_factory, user_id, &access_token, &sub, remote_total).await;
                (sub.id, outcome)
            });
        }
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((id, outcome)) => {
                    out.insert(id, outcome);
                }
                Err(err) => tracing::error!(error = %err, "spotify episode fetch task panicked"),
            }
        }
        out
    }
}

fn clone_error(err: &crate::Error) -> crate::Error {
    crate::Error::new(err.kind())
}

/// Newest-first selection comparing against `last_published_at` (day
/// precision) rather than `last_polled_at`. First poll takes only the
/// latest playable episode.
fn select_new_episodes(decoded: &[DecodedItem], last_published_at: Option<i64>) -> Vec<DecodedItem> {
    let mut sorted: Vec<DecodedItem> = decoded.to_vec();
    sorted.sort_by_key(|item| std::cmp::Reverse(item.published_at));

    match last_published_at {
        None => sorted.into_iter().take(1).collect(),
        Some(watermark) => sorted
            .into_iter()
            .filter(|item| item.published_at.is_some_and(|p| p > watermark))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, published_at: i64) -> DecodedItem {
        DecodedItem {
            provider_item_id: id.to_owned(),
            title: id.to_owned(),
            canonical_url: String::new(),
            thumbnail_url: None,
            published_at: Some(published_at),
            duration_seconds: Some(1_800),
            summary: None,
            is_playable: true,
            raw: serde_json::json!({}),
        }
    }

    #[test]
    fn first_poll_selects_only_latest_episode() {
        let items = vec![item("a", 100), item("b", 300)];
        let selected = select_new_episodes(&items, None);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].provider_item_id, "b");
    }

    #[test]
    fn compares_against_last_published_at_not_last_polled_at() {
        let items = vec![item("a", 100), item("b", 300), item("c", 200)];
        let selected = select_new_episodes(&items, Some(150));
        let ids: Vec<&str> = selected.iter().map(|i| i.provider_item_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }
}
