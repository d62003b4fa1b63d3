//! Shared domain enums and ID newtypes used across every component.

use std::fmt;

use serde::{Deserialize, Serialize};
use strum_macros::Display;
use uuid::Uuid;

use crate::time::new_sortable_id;

macro_rules! id_type {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            #[must_use]
            pub fn new() -> Self {
                Self(new_sortable_id())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

id_type!(UserId);
id_type!(CreatorId);
id_type!(ItemId);
id_type!(UserItemId);
id_type!(SubscriptionId);
id_type!(SubscriptionItemId);
id_type!(ProviderItemsSeenId);
id_type!(ProviderConnectionId);
id_type!(UserNotificationId);
id_type!(DeadLetterQueueId);

/// Third-party content provider. Only YouTube and Spotify have pollers
/// implemented in this crate; `Rss`/`Web` exist so [`crate::domain::Creator`]'s
/// synthetic-id derivation (§3) has somewhere to apply.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum Provider {
    Youtube,
    Spotify,
    Rss,
    Web,
}

impl Provider {
    /// Providers whose native ids are stable and globally unique, as
    /// opposed to [`Provider::Rss`]/[`Provider::Web`] which need a
    /// synthetic hashed id (§3 Creator).
    #[must_use]
    pub const fn has_native_creator_id(self) -> bool {
        matches!(self, Self::Youtube | Self::Spotify)
    }
}

#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum ContentType {
    Video,
    Podcast,
    Article,
    Post,
}

#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum UserItemState {
    Inbox,
    Bookmarked,
    Archived,
}

#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum SubscriptionStatus {
    Active,
    Paused,
    Disconnected,
    Unsubscribed,
}

#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum ConnectionStatus {
    Active,
    Expired,
    Revoked,
}

#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NotificationType {
    ConnectionExpired,
    ConnectionRevoked,
    PollFailures,
    QuotaWarning,
}

#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DlqStatus {
    Pending,
    Retrying,
    Resolved,
    Abandoned,
}

/// Why an otherwise-valid item was not ingested. Fed to metrics, never
/// surfaced as an [`crate::error::Error`].
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SkipReason {
    AlreadySeen,
    UserItemExists,
    InvalidDate,
    Unavailable,
    ShortsFiltered,
}
