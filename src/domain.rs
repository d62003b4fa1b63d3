//! Entity structs for the subscription/ingestion data model.
//!
//! These mirror the rows a relational store would hold; this crate never
//! talks to a database directly (see [`crate::store`]) but every field here
//! is what a `Store` implementation must persist and load back unchanged.

use serde::{Deserialize, Serialize};

use crate::time::Timestamp;
use crate::types::{
    ConnectionStatus, ContentType, CreatorId, DeadLetterQueueId, DlqStatus, ItemId,
    NotificationType, Provider, ProviderConnectionId, ProviderItemsSeenId, SubscriptionId,
    SubscriptionItemId, SubscriptionStatus, UserId, UserItemId, UserItemState, UserNotificationId,
};

/// Externally owned identity; this crate never creates or mutates a `User`
/// row, only reads its id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: Option<String>,
}

/// A channel, show, or feed that publishes content.
///
/// Unique on `(provider, provider_creator_id)`. For providers without a
/// stable native id ([`Provider::Rss`], [`Provider::Web`]), the id is
/// derived by [`derive_creator_id`]. Find-or-create may fill previously-null
/// optional fields but never overwrites a non-null attribution field except
/// `name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Creator {
    pub id: CreatorId,
    pub provider: Provider,
    pub provider_creator_id: String,
    pub name: String,
    pub normalized_name: String,
    pub image_url: Option<String>,
    pub handle: Option<String>,
    pub external_url: Option<String>,
    pub description: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// First 32 hex chars of `SHA-256("{provider}:{lowercase(trim(name))}")`,
/// used as the synthetic `providerCreatorId` for providers lacking a native
/// creator id.
#[must_use]
pub fn derive_creator_id(provider: Provider, name: &str) -> String {
    use sha2::{Digest, Sha256};

    let normalized = format!("{provider}:{}", name.trim().to_lowercase());
    let digest = Sha256::digest(normalized.as_bytes());
    hex_prefix(&digest, 16)
}

fn hex_prefix(bytes: &[u8], char_len: usize) -> String {
    let mut out = String::with_capacity(char_len);
    for byte in bytes {
        if out.len() >= char_len {
            break;
        }
        out.push_str(&format!("{byte:02x}"));
    }
    out.truncate(char_len);
    out
}

/// Canonical content, shared across every user who has it in their inbox.
/// Unique on `(provider, provider_id)`. Never deleted by user actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub content_type: ContentType,
    pub provider: Provider,
    pub provider_id: String,
    pub canonical_url: String,
    pub title: String,
    pub thumbnail_url: Option<String>,
    pub creator_id: Option<CreatorId>,
    pub duration_seconds: Option<i64>,
    pub published_at: Option<Timestamp>,
    pub summary: Option<String>,
    pub raw_metadata: Option<serde_json::Value>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// A user's relationship to an [`Item`]: unique on `(user_id, item_id)`.
/// New ingestion always inserts with `state = Inbox`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserItem {
    pub id: UserItemId,
    pub user_id: UserId,
    pub item_id: ItemId,
    pub state: UserItemState,
    pub ingested_at: Timestamp,
    pub bookmarked_at: Option<Timestamp>,
    pub archived_at: Option<Timestamp>,
    pub last_opened_at: Option<Timestamp>,
    pub progress_position: Option<i64>,
    pub progress_duration: Option<i64>,
    pub is_finished: bool,
    pub finished_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// A user's subscription to a [`Creator`]'s channel/show.
///
/// Unique on `(user_id, provider, provider_channel_id)`. `last_published_at`
/// is the high-water mark of *successfully ingested* content only — never
/// set from the mere presence of a fetched-but-unignested item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub user_id: UserId,
    pub provider: Provider,
    pub provider_channel_id: String,
    pub creator_id: Option<CreatorId>,
    pub total_items: Option<i64>,
    pub last_published_at: Option<Timestamp>,
    pub last_polled_at: Option<Timestamp>,
    pub poll_interval_seconds: u64,
    pub status: SubscriptionStatus,
    pub disconnected_at: Option<Timestamp>,
    pub disconnected_reason: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Pure tracking row for delta detection and dedup; unique on
/// `(subscription_id, provider_item_id)`. Purged on unsubscribe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionItem {
    pub id: SubscriptionItemId,
    pub subscription_id: SubscriptionId,
    pub item_id: ItemId,
    pub provider_item_id: String,
    pub published_at: Option<Timestamp>,
    pub fetched_at: Timestamp,
}

/// Idempotency gate: a present row suppresses re-ingestion even across
/// re-subscribe. Unique on `(user_id, provider, provider_item_id)`. Never
/// purged by unsubscribe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderItemsSeen {
    pub id: ProviderItemsSeenId,
    pub user_id: UserId,
    pub provider: Provider,
    pub provider_item_id: String,
    pub source_id: Option<SubscriptionId>,
    pub first_seen_at: Timestamp,
}

/// OAuth connection for a user/provider pair. Unique on `(user_id,
/// provider)`. `access_token`/`refresh_token` are opaque ciphertext at the
/// persistence boundary; the core only ever sees plaintext inside
/// [`crate::auth::TokenService`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConnection {
    pub id: ProviderConnectionId,
    pub user_id: UserId,
    pub provider: Provider,
    pub provider_user_id: Option<String>,
    pub access_token: String,
    pub refresh_token: String,
    pub token_expires_at: Timestamp,
    pub scopes: Option<Vec<String>>,
    pub status: ConnectionStatus,
    pub connected_at: Timestamp,
    pub last_refreshed_at: Option<Timestamp>,
}

/// An active notice surfaced to the user. Partial-unique on `(user_id,
/// type, provider) WHERE resolved_at IS NULL` — deduplication is the
/// caller's responsibility (see [`crate::health`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserNotification {
    pub id: UserNotificationId,
    pub user_id: UserId,
    pub notification_type: NotificationType,
    pub provider: Option<Provider>,
    pub title: String,
    pub message: String,
    pub data: Option<serde_json::Value>,
    pub read_at: Option<Timestamp>,
    pub resolved_at: Option<Timestamp>,
    pub created_at: Timestamp,
}

/// Records an item that failed to transform/ingest after all inline
/// retries, for offline inspection and manual replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterQueue {
    pub id: DeadLetterQueueId,
    pub subscription_id: Option<SubscriptionId>,
    pub user_id: UserId,
    pub provider: Provider,
    pub provider_id: String,
    pub raw_data: serde_json::Value,
    pub error_message: String,
    pub error_type: Option<String>,
    pub error_stack: Option<String>,
    pub retry_count: u32,
    pub last_retry_at: Option<Timestamp>,
    pub status: DlqStatus,
    pub created_at: Timestamp,
}
