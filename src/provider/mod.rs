//! Provider-specific HTTP clients and response narrowing.
//!
//! Each provider module exposes a thin client plus a `decode` function that
//! turns a raw provider response into a [`DecodedItem`] or a [`ParseError`]
//! — narrowing happens here so the rest of the crate never branches on
//! provider-shaped JSON again.

pub mod spotify;
pub mod youtube;

use serde::{Deserialize, Serialize};

use crate::time::Timestamp;
use crate::types::SkipReason;

/// A provider item reduced to exactly what ingestion needs, independent of
/// which provider it came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecodedItem {
    pub provider_item_id: String,
    pub title: String,
    pub canonical_url: String,
    pub thumbnail_url: Option<String>,
    pub published_at: Option<Timestamp>,
    pub duration_seconds: Option<i64>,
    pub summary: Option<String>,
    pub is_playable: bool,
    pub raw: serde_json::Value,
}

/// A narrowing failure: the item is dropped and counted under `metric`,
/// never raised as a [`crate::Error`].
#[derive(Debug, Clone)]
pub struct ParseError {
    pub reason: String,
    pub metric: SkipReason,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.metric, self.reason)
    }
}

/// Splits a slice into chunks of at most `size`, for providers whose batch
/// endpoints cap how many ids can be requested at once.
pub(crate) fn chunked<T: Clone>(items: &[T], size: usize) -> impl Iterator<Item = Vec<T>> + '_ {
    items.chunks(size.max(1)).map(<[T]>::to_vec)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunked_splits_into_bounded_groups() {
        let ids: Vec<i32> = (0..105).collect();
        let chunks: Vec<Vec<i32>> = chunked(&ids, 50).collect();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 50);
        assert_eq!(chunks[2].len(), 5);
    }
}
