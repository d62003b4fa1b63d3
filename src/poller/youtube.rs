//! Video-channel poller (PP-Y).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinSet;

use crate::domain::Subscription;
use crate::ingestion::ingest_item;
use crate::provider::youtube::{self, RawVideoItem, YoutubeClient};
use crate::provider::DecodedItem;
use crate::types::{ContentType, Provider, SubscriptionId, UserId};
use crate::Result;

use super::{PollContext, PollOutcome, Poller};

/// Most recent playlist items fetched per poll.
const FETCH_COUNT: u32 = 10;
/// Subscriptions processed concurrently within one `poll_batch` wave.
const WAVE_SIZE: usize = 6;

pub struct YoutubePoller {
    client_factory: Arc<dyn Fn(String) -> YoutubeClient + Send + Sync>,
}

impl YoutubePoller {
    #[must_use]
    pub fn new(client_factory: Arc<dyn Fn(String) -> YoutubeClient + Send + Sync>) -> Self {
        Self { client_factory }
    }

    async fn fetch_and_decode(
        &self,
        access_token: &str,
        sub: &Subscription,
    ) -> Result<Vec<DecodedItem>> {
        let client = (self.client_factory)(access_token.to_owned());
        let playlist_id = youtube::derive_uploads_playlist_id(&sub.provider_channel_id)?;
        let mut raw_items = client.playlist_items(&playlist_id, FETCH_COUNT).await?;

        let video_ids: Vec<String> = raw_items.iter().map(|item| item.video_id.clone()).collect();
        let details = client.video_details(&video_ids).await.unwrap_or_default();
        merge_details(&mut raw_items, &details);

        Ok(raw_items
            .iter()
            .filter(|item| item.privacy_status.as_deref() != Some("private"))
            .filter_map(|item| youtube::decode(item).ok())
            .collect())
    }

    /// Selection, ingestion, and watermark advance shared by `poll_single`
    /// and `poll_batch` once each has its own decoded item list in hand.
    async fn ingest_decoded(
        &self,
        ctx: &PollContext,
        user_id: UserId,
        sub: &Subscription,
        decoded: Vec<DecodedItem>,
    ) -> Result<PollOutcome> {
        let selected = select_new_items(&decoded, sub.last_polled_at);

        let mut new_items = 0u32;
        let mut newest_ingested_at: Option<i64> = None;
        for item in selected {
            let outcome = ingest_item(
                &ctx.ingestion,
                user_id,
                sub.id,
                Provider::Youtube,
                ContentType::Video,
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
                    tracing::warn!(subscription_id = %sub.id, error = %err, "failed to ingest youtube item");
                }
            }
        }

        let now = ctx.clock.now_millis();
        let mut updated = sub.clone();
        updated.last_polled_at = Some(now);
        updated.last_published_at = newest_ingested_at.or(sub.last_published_at);
        updated.updated_at = now;
        ctx.subscriptions.update(updated).await?;

        Ok(PollOutcome {
            new_items,
            disconnected: false,
        })
    }
}

fn merge_details(items: &mut [RawVideoItem], details: &HashMap<String, (i64, String)>) {
    for item in items.iter_mut() {
        if let Some((duration, description)) = details.get(&item.video_id) {
            item.duration_seconds = Some(*duration).filter(|d| *d >= 0);
            if !description.is_empty() {
                item.description = description.clone();
            }
        }
    }
}

#[async_trait]
impl Poller for YoutubePoller {
    async fn poll_single(
        &self,
        ctx: &PollContext,
        user_id: UserId,
        access_token: &str,
        sub: &Subscription,
    ) -> Result<PollOutcome> {
        let decoded = self.fetch_and_decode(access_token, sub).await?;
        self.ingest_decoded(ctx, user_id, sub, decoded).await
    }

    /// Fetches every subscription's playlist page `WAVE_SIZE` at a time
    /// (concurrent within a wave), then issues one details lookup for every
    /// video id collected across the whole batch before ingesting.
    async fn poll_batch(
        &self,
        ctx: &PollContext,
        user_id: UserId,
        access_token: &str,
        subs: &[Subscription],
    ) -> HashMap<SubscriptionId, Result<PollOutcome>> {
        let mut out = HashMap::with_capacity(subs.len());
        let mut fetched: Vec<(Subscription, Vec<RawVideoItem>)> = Vec::with_capacity(subs.len());

        for wave in subs.chunks(WAVE_SIZE) {
            let mut tasks = JoinSet::new();
            for sub in wave {
                let client_factory = Arc::clone(&self.client_factory);
                let access_token = access_token.to_owned();
                let sub = sub.clone();
                tasks.spawn(async move {
                    let client = (client_factory)(access_token);
                    let playlist_items = match youtube::derive_uploads_playlist_id(&sub.provider_channel_id) {
                        Ok(playlist_id) => client.playlist_items(&playlist_id, FETCH_COUNT).await,
                        Err(err) => Err(err),
                    };
                    (sub, playlist_items)
                });
            }
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((sub, Ok(items))) => fetched.push((sub, items)),
                    Ok((sub, Err(err))) => {
                        out.insert(sub.id, Err(err));
                    }
                    Err(err) => tracing::error!(error = %err, "youtube playlist fetch task panicked"),
                }
            }
        }

        let all_video_ids: Vec<String> = fetched
            .iter()
            .flat_map(|(_, items)| items.iter().map(|item| item.video_id.clone()))
            .collect();
        let client = (self.client_factory)(access_token.to_owned());
        let details = client.video_details(&all_video_ids).await.unwrap_or_default();

        for (sub, mut raw_items) in fetched {
            merge_details(&mut raw_items, &details);
            let decoded: Vec<DecodedItem> = raw_items
                .iter()
                .filter(|item| item.privacy_status.as_deref() != Some("private"))
                .filter_map(|item| youtube::decode(item).ok())
                .collect();
            let outcome = self.ingest_decoded(ctx, user_id, &sub, decoded).await;
            out.insert(sub.id, outcome);
        }
        out
    }
}

/// Newest-first selection: first poll takes only the single newest item
/// ("welcome"); subsequent polls take everything newer than `last_polled_at`.
fn select_new_items(decoded: &[DecodedItem], last_polled_at: Option<i64>) -> Vec<DecodedItem> {
    let mut sorted: Vec<DecodedItem> = decoded.to_vec();
    sorted.sort_by_key(|item| std::cmp::Reverse(item.published_at));

    match last_polled_at {
        None => sorted.into_iter().take(1).collect(),
        Some(0) => sorted.into_iter().take(1).collect(),
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
            duration_seconds: Some(300),
            summary: None,
            is_playable: true,
            raw: serde_json::json!({}),
        }
    }

    #[test]
    fn first_poll_selects_only_the_single_newest_item() {
        let items = vec![item("a", 100), item("b", 300), item("c", 200)];
        let selected = select_new_items(&items, None);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].provider_item_id, "b");
    }

    #[test]
    fn subsequent_poll_keeps_everything_newer_than_watermark() {
        let items = vec![item("a", 100), item("b", 300), item("c", 200)];
        let selected = select_new_items(&items, Some(150));
        let ids: Vec<&str> = selected.iter().map(|i| i.provider_item_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }
}
