//! Repository interfaces, one per entity in the data model.

use async_trait::async_trait;

use crate::domain::{
    Creator, DeadLetterQueue, Item, ProviderConnection, Subscription, SubscriptionItem, User,
    UserItem, UserNotification,
};
use crate::time::Timestamp;
use crate::types::{
    CreatorId, ItemId, NotificationType, Provider, SubscriptionId, SubscriptionItemId,
    SubscriptionStatus, UserId, UserItemId, UserItemState,
};
use crate::Result;

/// A page of time-ordered rows. The cursor is always the last row's id.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get(&self, id: UserId) -> Result<Option<User>>;
}

#[async_trait]
pub trait CreatorStore: Send + Sync {
    async fn find_by_provider_id(
        &self,
        provider: Provider,
        provider_creator_id: &str,
    ) -> Result<Option<Creator>>;

    async fn get(&self, id: CreatorId) -> Result<Option<Creator>>;

    /// Inserts a brand-new creator row. Callers must have already checked
    /// [`find_by_provider_id`] — this is the "create" half of find-or-create.
    async fn insert(&self, creator: Creator) -> Result<Creator>;

    /// Applies a find-or-create update: fills null optional fields and
    /// updates `name`, never overwriting other non-null attribution.
    async fn update(&self, creator: Creator) -> Result<Creator>;
}

#[async_trait]
pub trait ItemStore: Send + Sync {
    async fn find_by_provider_id(
        &self,
        provider: Provider,
        provider_id: &str,
    ) -> Result<Option<Item>>;

    async fn get(&self, id: ItemId) -> Result<Option<Item>>;

    async fn insert(&self, item: Item) -> Result<Item>;
}

#[async_trait]
pub trait UserItemStore: Send + Sync {
    async fn find(&self, user_id: UserId, item_id: ItemId) -> Result<Option<UserItem>>;

    /// Inserts a new `UserItem` in `state = Inbox`. Returns `Ok(None)` if a
    /// row for `(user_id, item_id)` already exists (uniqueness conflict is
    /// success, not an error — the caller treats it as `skipped`).
    async fn try_insert(&self, user_item: UserItem) -> Result<Option<UserItem>>;

    async fn update_state(
        &self,
        id: UserItemId,
        state: UserItemState,
        now: Timestamp,
    ) -> Result<UserItem>;

    /// Deletes every `Inbox`-state `UserItem` that was ingested under the
    /// given subscription's provider items, by joining on item ids sourced
    /// from that subscription. Used by unsubscribe.
    async fn delete_inbox_for_items(&self, item_ids: &[ItemId], user_id: UserId) -> Result<u64>;
}

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn get(&self, id: SubscriptionId) -> Result<Option<Subscription>>;

    async fn find_by_channel(
        &self,
        user_id: UserId,
        provider: Provider,
        provider_channel_id: &str,
    ) -> Result<Option<Subscription>>;

    async fn upsert(&self, subscription: Subscription) -> Result<Subscription>;

    async fn update(&self, subscription: Subscription) -> Result<Subscription>;

    /// Subscriptions due for a poll: `status = Active` and either never
    /// polled or past their interval, ordered never-polled first then
    /// oldest `last_polled_at`.
    async fn list_due(&self, now: Timestamp) -> Result<Vec<Subscription>>;

    async fn list_by_user(
        &self,
        user_id: UserId,
        provider: Option<Provider>,
        status: Option<SubscriptionStatus>,
        limit: usize,
        cursor: Option<SubscriptionId>,
    ) -> Result<Page<Subscription>>;

    /// Bulk transition used by the health monitor's disconnect cascade.
    async fn set_status_for_connection(
        &self,
        user_id: UserId,
        provider: Provider,
        status: SubscriptionStatus,
        now: Timestamp,
    ) -> Result<u64>;
}

#[async_trait]
pub trait SubscriptionItemStore: Send + Sync {
    /// Inserts a tracking row; ignores uniqueness conflicts (returns
    /// `Ok(())` either way, matching the spec's "ignore conflict" rule).
    async fn try_insert(&self, row: SubscriptionItem) -> Result<()>;

    /// Up to `limit` most recent rows for a subscription, ordered by
    /// `published_at` descending, for the adaptive-interval activity scan.
    async fn recent(
        &self,
        subscription_id: SubscriptionId,
        limit: usize,
    ) -> Result<Vec<SubscriptionItem>>;

    async fn delete_for_subscription(&self, subscription_id: SubscriptionId) -> Result<u64>;

    async fn all(&self) -> Result<Vec<SubscriptionItem>>;

    #[allow(dead_code, reason = "id not yet exposed by a router operation")]
    async fn get(&self, id: SubscriptionItemId) -> Result<Option<SubscriptionItem>>;
}

/// Idempotency gate: `try_seen` returns `false` if the `(user_id, provider,
/// provider_item_id)` triple was already recorded, `true` if this call was
/// the one that planted it.
#[async_trait]
pub trait SeenStore: Send + Sync {
    async fn try_seen(
        &self,
        user_id: UserId,
        provider: Provider,
        provider_item_id: &str,
        source_id: Option<SubscriptionId>,
        now: Timestamp,
    ) -> Result<bool>;
}

#[async_trait]
pub trait ConnectionStore: Send + Sync {
    async fn get(&self, user_id: UserId, provider: Provider) -> Result<Option<ProviderConnection>>;

    async fn upsert(&self, connection: ProviderConnection) -> Result<ProviderConnection>;

    async fn update_tokens(
        &self,
        user_id: UserId,
        provider: Provider,
        access_token: String,
        refresh_token: String,
        token_expires_at: Timestamp,
        now: Timestamp,
    ) -> Result<ProviderConnection>;

    async fn set_status(
        &self,
        user_id: UserId,
        provider: Provider,
        status: crate::types::ConnectionStatus,
    ) -> Result<ProviderConnection>;
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn find_active(
        &self,
        user_id: UserId,
        notification_type: NotificationType,
        provider: Option<Provider>,
    ) -> Result<Option<UserNotification>>;

    async fn insert(&self, notification: UserNotification) -> Result<UserNotification>;

    /// Resolves every active notification matching `(user_id, type,
    /// provider)`, returning the number resolved.
    async fn resolve_active(
        &self,
        user_id: UserId,
        notification_type: NotificationType,
        provider: Option<Provider>,
        now: Timestamp,
    ) -> Result<u64>;

    async fn mark_read(
        &self,
        user_id: UserId,
        id: crate::types::UserNotificationId,
        now: Timestamp,
    ) -> Result<UserNotification>;

    /// `unread_only` excludes both read notifications and resolved ones —
    /// a resolved notice is no longer actionable, so it shouldn't linger in
    /// the unread list even if it was never explicitly marked read.
    async fn list(
        &self,
        user_id: UserId,
        unread_only: bool,
        limit: usize,
        cursor: Option<crate::types::UserNotificationId>,
    ) -> Result<Page<UserNotification>>;
}

#[async_trait]
pub trait DlqStore: Send + Sync {
    async fn insert(&self, entry: DeadLetterQueue) -> Result<DeadLetterQueue>;
}
