//! YouTube Data API v3 client: uploads-playlist derivation, playlist items,
//! and batched video details.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::Validation;
use crate::types::SkipReason;
use crate::Result;

use super::{chunked, DecodedItem, ParseError};

const API_BASE: &str = "https://www.googleapis.com/youtube/v3";
/// Videos at or below this duration are Shorts and are filtered out.
pub const SHORTS_THRESHOLD_SECONDS: i64 = 180;

/// Derives a channel's uploads playlist id without an extra API call: the
/// convention is the channel id with its `UC` prefix replaced by `UU`.
///
/// # Errors
/// Returns a validation error if `channel_id` doesn't start with `UC`.
pub fn derive_uploads_playlist_id(channel_id: &str) -> Result<String> {
    let Some(rest) = channel_id.strip_prefix("UC") else {
        return Err(Validation {
            reason: format!("channel id {channel_id} does not start with UC"),
        }
        .into());
    };
    Ok(format!("UU{rest}"))
}

#[derive(Debug, Clone, Serialize)]
struct PlaylistItemsQuery<'a> {
    part: &'a str,
    #[serde(rename = "playlistId")]
    playlist_id: &'a str,
    #[serde(rename = "maxResults")]
    max_results: u32,
    key: &'a str,
}

#[derive(Debug, Clone, Serialize)]
struct VideosQuery<'a> {
    part: &'a str,
    id: String,
    key: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
struct PlaylistItemsResponse {
    items: Vec<PlaylistItemResource>,
}

#[derive(Debug, Clone, Deserialize)]
struct PlaylistItemResource {
    #[serde(rename = "contentDetails")]
    content_details: PlaylistItemContentDetails,
    snippet: PlaylistItemSnippet,
}

#[derive(Debug, Clone, Deserialize)]
struct PlaylistItemContentDetails {
    #[serde(rename = "videoId")]
    video_id: String,
    #[serde(rename = "videoPublishedAt")]
    video_published_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct PlaylistItemSnippet {
    title: String,
    description: String,
    #[serde(rename = "publishedAt")]
    published_at: Option<String>,
    thumbnails: Option<Thumbnails>,
    #[serde(rename = "privacyStatus")]
    privacy_status: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct Thumbnails {
    high: Option<Thumbnail>,
    default: Option<Thumbnail>,
}

#[derive(Debug, Clone, Deserialize)]
struct Thumbnail {
    url: String,
}

#[derive(Debug, Clone, Deserialize)]
struct VideosResponse {
    items: Vec<VideoResource>,
}

#[derive(Debug, Clone, Deserialize)]
struct VideoResource {
    id: String,
    #[serde(rename = "contentDetails")]
    content_details: VideoContentDetails,
    snippet: VideoSnippet,
}

#[derive(Debug, Clone, Deserialize)]
struct VideoContentDetails {
    duration: String,
}

#[derive(Debug, Clone, Deserialize)]
struct VideoSnippet {
    description: String,
}

/// A playlist item merged with its (optional) full video detail — the
/// shape [`decode`] consumes.
#[derive(Debug, Clone)]
pub struct RawVideoItem {
    pub video_id: String,
    pub title: String,
    pub description: String,
    pub published_at: Option<String>,
    pub thumbnail_url: Option<String>,
    pub privacy_status: Option<String>,
    pub duration_seconds: Option<i64>,
}

pub struct YoutubeClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl YoutubeClient {
    #[must_use]
    pub fn new(http: reqwest::Client, api_key: String) -> Self {
        Self {
            http,
            api_key,
            base_url: API_BASE.to_owned(),
        }
    }

    /// Points the client at a different host, e.g. a mock server in tests.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Fetches up to `max` playlist items, newest first as returned by the API.
    #[tracing::instrument(skip(self), fields(playlist_id))]
    pub async fn playlist_items(&self, playlist_id: &str, max: u32) -> Result<Vec<RawVideoItem>> {
        let query = PlaylistItemsQuery {
            part: "snippet,contentDetails",
            playlist_id,
            max_results: max,
            key: &self.api_key,
        };
        let response: PlaylistItemsResponse = self
            .http
            .get(format!("{}/playlistItems", self.base_url))
            .query(&query)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(response
            .items
            .into_iter()
            .map(|item| RawVideoItem {
                video_id: item.content_details.video_id,
                title: item.snippet.title,
                description: item.snippet.description,
                published_at: item
                    .content_details
                    .video_published_at
                    .or(item.snippet.published_at),
                thumbnail_url: item.snippet.thumbnails.and_then(|t| {
                    t.high.or(t.default).map(|thumb| thumb.url)
                }),
                privacy_status: item.snippet.privacy_status,
                duration_seconds: None,
            })
            .collect())
    }

    /// Batch-fetches full video details (duration, full description),
    /// chunked at 50 ids per request per the API's limit.
    #[tracing::instrument(skip(self, video_ids))]
    pub async fn video_details(
        &self,
        video_ids: &[String],
    ) -> Result<HashMap<String, (i64, String)>> {
        let mut out = HashMap::with_capacity(video_ids.len());
        for chunk in chunked(video_ids, 50) {
            if chunk.is_empty() {
                continue;
            }
            let query = VideosQuery {
                part: "contentDetails,snippet",
                id: chunk.join(","),
                key: &self.api_key,
            };
            let response: VideosResponse = self
                .http
                .get(format!("{}/videos", self.base_url))
                .query(&query)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            for video in response.items {
                let seconds = parse_iso8601_duration(&video.content_details.duration);
                out.insert(video.id, (seconds, video.snippet.description));
            }
        }
        Ok(out)
    }
}

/// Parses an ISO-8601 duration like `PT4M13S` into whole seconds. Returns
/// `-1` (an impossible duration) on anything unparseable, so callers can
/// treat it the same as "unknown" without an `Option` at this layer.
fn parse_iso8601_duration(value: &str) -> i64 {
    let Some(rest) = value.strip_prefix("PT") else {
        return -1;
    };
    let mut seconds: i64 = 0;
    let mut number = String::new();
    for ch in rest.chars() {
        if ch.is_ascii_digit() {
            number.push(ch);
            continue;
        }
        let Ok(value) = number.parse::<i64>() else {
            return -1;
        };
        number.clear();
        match ch {
            'H' => seconds += value * 3_600,
            'M' => seconds += value * 60,
            'S' => seconds += value,
            _ => return -1,
        }
    }
    seconds
}

/// Narrows a merged playlist item + detail into a [`DecodedItem`], applying
/// the Shorts filter and date parsing. Unknown duration is kept (fail-safe).
pub fn decode(item: &RawVideoItem) -> std::result::Result<DecodedItem, ParseError> {
    if let Some(duration) = item.duration_seconds {
        if duration >= 0 && duration <= SHORTS_THRESHOLD_SECONDS {
            return Err(ParseError {
                reason: format!("duration {duration}s at or under Shorts threshold"),
                metric: SkipReason::ShortsFiltered,
            });
        }
    }

    let Some(published_raw) = item.published_at.as_deref() else {
        return Err(ParseError {
            reason: "missing publishedAt".to_owned(),
            metric: SkipReason::InvalidDate,
        });
    };
    let Ok(published_at) = chrono::DateTime::parse_from_rfc3339(published_raw) else {
        return Err(ParseError {
            reason: format!("invalid publishedAt {published_raw}"),
            metric: SkipReason::InvalidDate,
        });
    };

    Ok(DecodedItem {
        provider_item_id: item.video_id.clone(),
        title: item.title.clone(),
        canonical_url: format!("https://www.youtube.com/watch?v={}", item.video_id),
        thumbnail_url: item.thumbnail_url.clone(),
        published_at: Some(published_at.timestamp_millis()),
        duration_seconds: item.duration_seconds.filter(|d| *d >= 0),
        summary: Some(item.description.clone()),
        is_playable: true,
        raw: serde_json::json!({ "videoId": item.video_id }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_uploads_playlist_id_from_channel_id() {
        let playlist = derive_uploads_playlist_id("UCabc123").unwrap();
        assert_eq!(playlist, "UUabc123");
    }

    #[test]
    fn derive_uploads_playlist_id_rejects_non_uc_channel_id() {
        assert!(derive_uploads_playlist_id("xyz123").is_err());
    }

    #[test]
    fn duration_exactly_at_threshold_is_filtered() {
        let seconds = parse_iso8601_duration("PT3M");
        assert_eq!(seconds, 180);
        let item = RawVideoItem {
            video_id: "v".to_owned(),
            title: "t".to_owned(),
            description: String::new(),
            published_at: Some("2024-01-01T00:00:00Z".to_owned()),
            thumbnail_url: None,
            privacy_status: Some("public".to_owned()),
            duration_seconds: Some(seconds),
        };
        assert!(decode(&item).is_err());
    }

    #[test]
    fn duration_one_second_over_threshold_is_kept() {
        let item = RawVideoItem {
            video_id: "v".to_owned(),
            title: "t".to_owned(),
            description: String::new(),
            published_at: Some("2024-01-01T00:00:00Z".to_owned()),
            thumbnail_url: None,
            privacy_status: Some("public".to_owned()),
            duration_seconds: Some(181),
        };
        assert!(decode(&item).is_ok());
    }

    #[test]
    fn unknown_duration_is_kept_fail_safe() {
        let item = RawVideoItem {
            video_id: "v".to_owned(),
            title: "t".to_owned(),
            description: String::new(),
            published_at: Some("2024-01-01T00:00:00Z".to_owned()),
            thumbnail_url: None,
            privacy_status: Some("public".to_owned()),
            duration_seconds: None,
        };
        assert!(decode(&item).is_ok());
    }

    #[test]
    fn missing_published_at_is_dropped() {
        let item = RawVideoItem {
            video_id: "v".to_owned(),
            title: "t".to_owned(),
            description: String::new(),
            published_at: None,
            thumbnail_url: None,
            privacy_status: Some("public".to_owned()),
            duration_seconds: Some(300),
        };
        let err = decode(&item).unwrap_err();
        assert!(matches!(err.metric, SkipReason::InvalidDate));
    }
}
