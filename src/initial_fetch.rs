//! Welcome-item fetch triggered on a successful `subscriptions.add`.
//!
//! Failures here are logged and swallowed: the subscription the caller just
//! created must remain `ACTIVE` regardless of whether a welcome item could
//! be produced.

use crate::domain::Subscription;
use crate::ingestion::ingest_item;
use crate::poller::PollContext;
use crate::provider::spotify::{self, SpotifyClient};
use crate::provider::youtube::{self, YoutubeClient};
use crate::types::{ContentType, Provider, UserId};

/// Video channel: list up to 10 recent playlist items, keep public items
/// published no later than now, fetch durations, pick the first non-Short.
pub async fn fetch_youtube_welcome_item(
    ctx: &PollContext,
    client: &YoutubeClient,
    user_id: UserId,
    sub: &Subscription,
) {
    let result: crate::Result<()> = async {
        let playlist_id = youtube::derive_uploads_playlist_id(&sub.provider_channel_id)?;
        let mut items = client.playlist_items(&playlist_id, 10).await?;
        let now = ctx.clock.now_millis();

        let video_ids: Vec<String> = items.iter().map(|i| i.video_id.clone()).collect();
        let details = client.video_details(&video_ids).await.unwrap_or_default();
        for item in &mut items {
            if let Some((duration, description)) = details.get(&item.video_id) {
                item.duration_seconds = Some(*duration).filter(|d| *d >= 0);
                if !description.is_empty() {
                    item.description = description.clone();
                }
            }
        }

        let Some(chosen) = items
            .iter()
            .filter(|item| item.privacy_status.as_deref() == Some("public"))
            .filter_map(|item| youtube::decode(item).ok())
            .find(|decoded| decoded.published_at.is_some_and(|p| p <= now))
        else {
            return Ok(());
        };

        let outcome = ingest_item(
            &ctx.ingestion,
            user_id,
            sub.id,
            Provider::Youtube,
            ContentType::Video,
            &sub.provider_channel_id,
            &sub.provider_channel_id,
            chosen.clone(),
        )
        .await?;

        if outcome.created {
            let mut updated = sub.clone();
            updated.last_polled_at = Some(now);
            updated.last_published_at = outcome.published_at;
            updated.updated_at = now;
            ctx.subscriptions.update(updated).await?;
        } else {
            let mut updated = sub.clone();
            updated.last_polled_at = Some(now);
            updated.updated_at = now;
            ctx.subscriptions.update(updated).await?;
        }
        Ok(())
    }
    .await;

    if let Err(err) = result {
        tracing::warn!(subscription_id = %sub.id, error = %err, "youtube initial fetch failed");
    }
}

/// Podcast show: fetch show metadata for `totalEpisodes`, fetch the newest
/// episode, skip if its release date is in the future.
pub async fn fetch_spotify_welcome_item(
    ctx: &PollContext,
    client: &SpotifyClient,
    user_id: UserId,
    sub: &Subscription,
) {
    let result: crate::Result<()> = async {
        let shows = client.shows(std::slice::from_ref(&sub.provider_channel_id)).await?;
        let Some(show) = shows.get(&sub.provider_channel_id) else {
            return Ok(());
        };

        let now = ctx.clock.now_millis();
        let episodes = client.episodes(&sub.provider_channel_id, 1).await?;
        let Some(newest) = episodes.first() else {
            return Ok(());
        };
        let decoded = spotify::decode(newest, now).map_err(|err| crate::Error::validation(err.to_string()))?;
        if decoded.published_at.is_some_and(|p| p > now) {
            return Ok(());
        }

        let outcome = ingest_item(
            &ctx.ingestion,
            user_id,
            sub.id,
            Provider::Spotify,
            ContentType::Podcast,
            &sub.provider_channel_id,
            &sub.provider_channel_id,
            decoded.clone(),
        )
        .await?;

        let mut updated = sub.clone();
        updated.last_polled_at = Some(now);
        updated.updated_at = now;
        if outcome.created {
            updated.last_published_at = outcome.published_at;
            updated.total_items = Some(show.total_episodes);
        }
        ctx.subscriptions.update(updated).await?;
        Ok(())
    }
    .await;

    if let Err(err) = result {
        tracing::warn!(subscription_id = %sub.id, error = %err, "spotify initial fetch failed");
    }
}

