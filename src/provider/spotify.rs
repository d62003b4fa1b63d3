//! Spotify Web API client: batched show metadata and episode listing.

use std::collections::HashMap;

use chrono::{NaiveDate, TimeZone, Utc};
use serde::Deserialize;

use crate::types::SkipReason;
use crate::Result;

use super::{chunked, DecodedItem, ParseError};

const API_BASE: &str = "https://api.spotify.com/v1";

#[derive(Debug, Clone, Deserialize)]
struct ShowsResponse {
    shows: Vec<Option<ShowResource>>,
}

#[derive(Debug, Clone, Deserialize)]
struct ShowResource {
    id: String,
    name: String,
    #[serde(rename = "total_episodes")]
    total_episodes: i64,
    images: Vec<SpotifyImage>,
}

#[derive(Debug, Clone, Deserialize)]
struct SpotifyImage {
    url: String,
}

/// A show's batched metadata, reduced to what the poller needs.
#[derive(Debug, Clone)]
pub struct ShowMetadata {
    pub id: String,
    pub name: String,
    pub total_episodes: i64,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct EpisodesResponse {
    items: Vec<EpisodeResource>,
}

#[derive(Debug, Clone, Deserialize)]
struct EpisodeResource {
    id: String,
    name: String,
    description: String,
    #[serde(rename = "release_date")]
    release_date: String,
    #[serde(rename = "duration_ms")]
    duration_ms: i64,
    #[serde(rename = "is_playable")]
    is_playable: Option<bool>,
    images: Vec<SpotifyImage>,
    #[serde(rename = "external_urls")]
    external_urls: ExternalUrls,
}

#[derive(Debug, Clone, Deserialize)]
struct ExternalUrls {
    spotify: Option<String>,
}

pub struct SpotifyClient {
    http: reqwest::Client,
    access_token: String,
    base_url: String,
}

impl SpotifyClient {
    #[must_use]
    pub fn new(http: reqwest::Client, access_token: String) -> Self {
        Self {
            http,
            access_token,
            base_url: API_BASE.to_owned(),
        }
    }

    /// Points the client at a different host, e.g. a mock server in tests.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Batch show-metadata lookup, chunked at 50 ids per request. A show id
    /// absent from the response map means the show is gone from Spotify.
    #[tracing::instrument(skip(self, show_ids))]
    pub async fn shows(&self, show_ids: &[String]) -> Result<HashMap<String, ShowMetadata>> {
        let mut out = HashMap::with_capacity(show_ids.len());
        for chunk in chunked(show_ids, 50) {
            if chunk.is_empty() {
                continue;
            }
            let response: ShowsResponse = self
                .http
                .get(format!("{}/shows", self.base_url))
                .bearer_auth(&self.access_token)
                .query(&[("ids", chunk.join(","))])
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            for show in response.shows.into_iter().flatten() {
                out.insert(
                    show.id.clone(),
                    ShowMetadata {
                        id: show.id,
                        name: show.name,
                        total_episodes: show.total_episodes,
                        image_url: show.images.first().map(|img| img.url.clone()),
                    },
                );
            }
        }
        Ok(out)
    }

    /// Fetches up to `limit` most recent episodes for one show.
    #[tracing::instrument(skip(self), fields(show_id))]
    pub async fn episodes(&self, show_id: &str, limit: u32) -> Result<Vec<RawEpisode>> {
        let response: EpisodesResponse = self
            .http
            .get(format!("{}/shows/{show_id}/episodes", self.base_url))
            .bearer_auth(&self.access_token)
            .query(&[("limit", limit.to_string())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(response
            .items
            .into_iter()
            .map(|episode| RawEpisode {
                episode_id: episode.id,
                title: episode.name,
                description: episode.description,
                release_date: episode.release_date,
                duration_ms: episode.duration_ms,
                is_playable: episode.is_playable.unwrap_or(true),
                thumbnail_url: episode.images.first().map(|img| img.url.clone()),
                external_url: episode.external_urls.spotify,
            })
            .collect())
    }
}

#[derive(Debug, Clone)]
pub struct RawEpisode {
    pub episode_id: String,
    pub title: String,
    pub description: String,
    pub release_date: String,
    pub duration_ms: i64,
    pub is_playable: bool,
    pub thumbnail_url: Option<String>,
    pub external_url: Option<String>,
}

/// Normalizes a Spotify `release_date` (`YYYY`, `YYYY-MM`, or `YYYY-MM-DD`)
/// to a millisecond timestamp, left-anchoring to January/1st. Falls back to
/// `now` on anything unparseable.
#[must_use]
pub fn normalize_release_date(value: &str, now_millis: i64) -> i64 {
    let padded = match value.len() {
        4 => format!("{value}-01-01"),
        7 => format!("{value}-01"),
        _ => value.to_owned(),
    };
    NaiveDate::parse_from_str(&padded, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .and_then(|naive| Utc.from_local_datetime(&naive).single())
        .map_or(now_millis, |dt| dt.timestamp_millis())
}

/// Narrows a raw episode into a [`DecodedItem`], applying the unplayable
/// filter and release-date normalization.
pub fn decode(
    episode: &RawEpisode,
    now_millis: i64,
) -> std::result::Result<DecodedItem, ParseError> {
    if !episode.is_playable {
        return Err(ParseError {
            reason: "episode is not playable".to_owned(),
            metric: SkipReason::Unavailable,
        });
    }
    let published_at = normalize_release_date(&episode.release_date, now_millis);
    Ok(DecodedItem {
        provider_item_id: episode.episode_id.clone(),
        title: episode.title.clone(),
        canonical_url: episode
            .external_url
            .clone()
            .unwrap_or_else(|| format!("https://open.spotify.com/episode/{}", episode.episode_id)),
        thumbnail_url: episode.thumbnail_url.clone(),
        published_at: Some(published_at),
        duration_seconds: Some(episode.duration_ms / 1_000),
        summary: Some(episode.description.clone()),
        is_playable: true,
        raw: serde_json::json!({ "episodeId": episode.episode_id }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_year_only_date() {
        let millis = normalize_release_date("2024", 0);
        let dt = chrono::DateTime::from_timestamp_millis(millis).unwrap();
        assert_eq!(dt.to_rfc3339(), "2024-01-01T00:00:00+00:00");
    }

    #[test]
    fn normalizes_year_month_date() {
        let millis = normalize_release_date("2024-06", 0);
        let dt = chrono::DateTime::from_timestamp_millis(millis).unwrap();
        assert_eq!(dt.to_rfc3339(), "2024-06-01T00:00:00+00:00");
    }

    #[test]
    fn normalizes_full_date_to_midnight_utc() {
        let millis = normalize_release_date("2024-06-15", 0);
        let dt = chrono::DateTime::from_timestamp_millis(millis).unwrap();
        assert_eq!(dt.to_rfc3339(), "2024-06-15T00:00:00+00:00");
    }

    #[test]
    fn invalid_date_falls_back_to_now() {
        let millis = normalize_release_date("not-a-date", 123_456);
        assert_eq!(millis, 123_456);
    }

    fn episode(playable: bool) -> RawEpisode {
        RawEpisode {
            episode_id: "ep1".to_owned(),
            title: "Episode".to_owned(),
            description: String::new(),
            release_date: "2024-01-15".to_owned(),
            duration_ms: 120_000,
            is_playable: playable,
            thumbnail_url: None,
            external_url: None,
        }
    }

    #[test]
    fn unplayable_episode_is_dropped() {
        let err = decode(&episode(false), 0).unwrap_err();
        assert!(matches!(err.metric, SkipReason::Unavailable));
    }

    #[test]
    fn playable_episode_decodes() {
        assert!(decode(&episode(true), 0).is_ok());
    }
}
