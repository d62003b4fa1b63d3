//! `dashmap`-backed in-memory implementations of every store trait.
//!
//! Intended for tests and single-process deployments; nothing here
//! survives a restart. Each store owns one or two `DashMap`s plus whatever
//! secondary index its lookups need.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::domain::{
    Creator, DeadLetterQueue, Item, ProviderConnection, Subscription, SubscriptionItem, User,
    UserItem, UserNotification,
};
use crate::error::NotFound;
use crate::time::Timestamp;
use crate::types::{
    ConnectionStatus, CreatorId, ItemId, NotificationType, Provider, SubscriptionId,
    SubscriptionItemId, SubscriptionStatus, UserId, UserItemId, UserItemState,
    UserNotificationId,
};
use crate::Result;

use super::traits::{
    ConnectionStore, CreatorStore, DlqStore, ItemStore, NotificationStore, Page, SeenStore,
    SubscriptionItemStore, SubscriptionStore, UserItemStore, UserStore,
};

#[derive(Debug, Default)]
pub struct InMemoryUserStore {
    rows: DashMap<UserId, User>,
}

impl InMemoryUserStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, user: User) {
        self.rows.insert(user.id, user);
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn get(&self, id: UserId) -> Result<Option<User>> {
        Ok(self.rows.get(&id).map(|r| r.value().clone()))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCreatorStore {
    rows: DashMap<CreatorId, Creator>,
    by_provider_id: DashMap<(Provider, String), CreatorId>,
}

impl InMemoryCreatorStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CreatorStore for InMemoryCreatorStore {
    async fn find_by_provider_id(
        &self,
        provider: Provider,
        provider_creator_id: &str,
    ) -> Result<Option<Creator>> {
        let Some(id) = self
            .by_provider_id
            .get(&(provider, provider_creator_id.to_owned()))
            .map(|r| *r.value())
        else {
            return Ok(None);
        };
        Ok(self.rows.get(&id).map(|r| r.value().clone()))
    }

    async fn get(&self, id: CreatorId) -> Result<Option<Creator>> {
        Ok(self.rows.get(&id).map(|r| r.value().clone()))
    }

    async fn insert(&self, creator: Creator) -> Result<Creator> {
        self.by_provider_id.insert(
            (creator.provider, creator.provider_creator_id.clone()),
            creator.id,
        );
        self.rows.insert(creator.id, creator.clone());
        Ok(creator)
    }

    async fn update(&self, creator: Creator) -> Result<Creator> {
        self.rows.insert(creator.id, creator.clone());
        Ok(creator)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryItemStore {
    rows: DashMap<ItemId, Item>,
    by_provider_id: DashMap<(Provider, String), ItemId>,
}

impl InMemoryItemStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ItemStore for InMemoryItemStore {
    async fn find_by_provider_id(
        &self,
        provider: Provider,
        provider_id: &str,
    ) -> Result<Option<Item>> {
        let Some(id) = self
            .by_provider_id
            .get(&(provider, provider_id.to_owned()))
            .map(|r| *r.value())
        else {
            return Ok(None);
        };
        Ok(self.rows.get(&id).map(|r| r.value().clone()))
    }

    async fn get(&self, id: ItemId) -> Result<Option<Item>> {
        Ok(self.rows.get(&id).map(|r| r.value().clone()))
    }

    async fn insert(&self, item: Item) -> Result<Item> {
        self.by_provider_id
            .insert((item.provider, item.provider_id.clone()), item.id);
        self.rows.insert(item.id, item.clone());
        Ok(item)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryUserItemStore {
    rows: DashMap<UserItemId, UserItem>,
    by_user_item: DashMap<(UserId, ItemId), UserItemId>,
}

impl InMemoryUserItemStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserItemStore for InMemoryUserItemStore {
    async fn find(&self, user_id: UserId, item_id: ItemId) -> Result<Option<UserItem>> {
        let Some(id) = self
            .by_user_item
            .get(&(user_id, item_id))
            .map(|r| *r.value())
        else {
            return Ok(None);
        };
        Ok(self.rows.get(&id).map(|r| r.value().clone()))
    }

    async fn try_insert(&self, user_item: UserItem) -> Result<Option<UserItem>> {
        let key = (user_item.user_id, user_item.item_id);
        if self.by_user_item.contains_key(&key) {
            return Ok(None);
        }
        self.by_user_item.insert(key, user_item.id);
        self.rows.insert(user_item.id, user_item.clone());
        Ok(Some(user_item))
    }

    async fn update_state(
        &self,
        id: UserItemId,
        state: UserItemState,
        now: Timestamp,
    ) -> Result<UserItem> {
        let mut entry = self
            .rows
            .get_mut(&id)
            .ok_or_else(|| NotFound {
                reason: format!("user_item {id}"),
            })?;
        entry.state = state;
        entry.updated_at = now;
        match state {
            UserItemState::Bookmarked => entry.bookmarked_at = Some(now),
            UserItemState::Archived => entry.archived_at = Some(now),
            UserItemState::Inbox => {}
        }
        Ok(entry.clone())
    }

    async fn delete_inbox_for_items(&self, item_ids: &[ItemId], user_id: UserId) -> Result<u64> {
        let mut deleted = 0u64;
        for item_id in item_ids {
            let Some(id) = self
                .by_user_item
                .get(&(user_id, *item_id))
                .map(|r| *r.value())
            else {
                continue;
            };
            let is_inbox = self
                .rows
                .get(&id)
                .is_some_and(|r| r.state == UserItemState::Inbox);
            if is_inbox {
                self.rows.remove(&id);
                self.by_user_item.remove(&(user_id, *item_id));
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

#[derive(Debug, Default)]
pub struct InMemorySubscriptionStore {
    rows: DashMap<SubscriptionId, Subscription>,
    by_channel: DashMap<(UserId, Provider, String), SubscriptionId>,
}

impl InMemorySubscriptionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn get(&self, id: SubscriptionId) -> Result<Option<Subscription>> {
        Ok(self.rows.get(&id).map(|r| r.value().clone()))
    }

    async fn find_by_channel(
        &self,
        user_id: UserId,
        provider: Provider,
        provider_channel_id: &str,
    ) -> Result<Option<Subscription>> {
        let Some(id) = self
            .by_channel
            .get(&(user_id, provider, provider_channel_id.to_owned()))
            .map(|r| *r.value())
        else {
            return Ok(None);
        };
        Ok(self.rows.get(&id).map(|r| r.value().clone()))
    }

    async fn upsert(&self, subscription: Subscription) -> Result<Subscription> {
        self.by_channel.insert(
            (
                subscription.user_id,
                subscription.provider,
                subscription.provider_channel_id.clone(),
            ),
            subscription.id,
        );
        self.rows.insert(subscription.id, subscription.clone());
        Ok(subscription)
    }

    async fn update(&self, subscription: Subscription) -> Result<Subscription> {
        self.rows.insert(subscription.id, subscription.clone());
        Ok(subscription)
    }

    async fn list_due(&self, now: Timestamp) -> Result<Vec<Subscription>> {
        let mut due: Vec<Subscription> = self
            .rows
            .iter()
            .filter(|r| {
                let sub = r.value();
                sub.status == SubscriptionStatus::Active
                    && sub.last_polled_at.is_none_or(|last| {
                        now - last >= i64::try_from(sub.poll_interval_seconds).unwrap_or(i64::MAX) * 1_000
                    })
            })
            .map(|r| r.value().clone())
            .collect();
        due.sort_by_key(|sub| (sub.last_polled_at.is_some(), sub.last_polled_at));
        Ok(due)
    }

    async fn list_by_user(
        &self,
        user_id: UserId,
        provider: Option<Provider>,
        status: Option<SubscriptionStatus>,
        limit: usize,
        cursor: Option<SubscriptionId>,
    ) -> Result<Page<Subscription>> {
        let mut matching: Vec<Subscription> = self
            .rows
            .iter()
            .filter(|r| {
                let sub = r.value();
                sub.user_id == user_id
                    && provider.is_none_or(|p| p == sub.provider)
                    && status.is_none_or(|s| s == sub.status)
                    && cursor.is_none_or(|c| sub.id > c)
            })
            .map(|r| r.value().clone())
            .collect();
        matching.sort_by_key(|sub| sub.id);
        let has_more = matching.len() > limit;
        matching.truncate(limit);
        let next_cursor = matching.last().map(|sub| sub.id.to_string());
        Ok(Page {
            items: matching,
            next_cursor,
            has_more,
        })
    }

    async fn set_status_for_connection(
        &self,
        user_id: UserId,
        provider: Provider,
        status: SubscriptionStatus,
        now: Timestamp,
    ) -> Result<u64> {
        let mut count = 0u64;
        for mut entry in self.rows.iter_mut() {
            let sub = entry.value_mut();
            if sub.user_id == user_id && sub.provider == provider {
                sub.status = status;
                sub.updated_at = now;
                count += 1;
            }
        }
        Ok(count)
    }
}

#[derive(Debug, Default)]
pub struct InMemorySubscriptionItemStore {
    rows: DashMap<SubscriptionItemId, SubscriptionItem>,
    dedup: DashMap<(SubscriptionId, String), SubscriptionItemId>,
}

impl InMemorySubscriptionItemStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubscriptionItemStore for InMemorySubscriptionItemStore {
    async fn try_insert(&self, row: SubscriptionItem) -> Result<()> {
        let key = (row.subscription_id, row.provider_item_id.clone());
        if self.dedup.contains_key(&key) {
            return Ok(());
        }
        self.dedup.insert(key, row.id);
        self.rows.insert(row.id, row);
        Ok(())
    }

    async fn recent(
        &self,
        subscription_id: SubscriptionId,
        limit: usize,
    ) -> Result<Vec<SubscriptionItem>> {
        let mut rows: Vec<SubscriptionItem> = self
            .rows
            .iter()
            .filter(|r| r.value().subscription_id == subscription_id)
            .map(|r| r.value().clone())
            .collect();
        rows.sort_by_key(|r| std::cmp::Reverse(r.published_at));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn delete_for_subscription(&self, subscription_id: SubscriptionId) -> Result<u64> {
        let keys: Vec<SubscriptionItemId> = self
            .rows
            .iter()
            .filter(|r| r.value().subscription_id == subscription_id)
            .map(|r| *r.key())
            .collect();
        let count = keys.len() as u64;
        for key in keys {
            if let Some((_, row)) = self.rows.remove(&key) {
                self.dedup
                    .remove(&(row.subscription_id, row.provider_item_id));
            }
        }
        Ok(count)
    }

    async fn all(&self) -> Result<Vec<SubscriptionItem>> {
        Ok(self.rows.iter().map(|r| r.value().clone()).collect())
    }

    async fn get(&self, id: SubscriptionItemId) -> Result<Option<SubscriptionItem>> {
        Ok(self.rows.get(&id).map(|r| r.value().clone()))
    }
}

#[derive(Debug, Default)]
pub struct InMemorySeenStore {
    rows: DashMap<(UserId, Provider, String), Timestamp>,
}

impl InMemorySeenStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SeenStore for InMemorySeenStore {
    async fn try_seen(
        &self,
        user_id: UserId,
        provider: Provider,
        provider_item_id: &str,
        _source_id: Option<SubscriptionId>,
        now: Timestamp,
    ) -> Result<bool> {
        let key = (user_id, provider, provider_item_id.to_owned());
        match self.rows.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(false),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(now);
                Ok(true)
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryConnectionStore {
    rows: DashMap<(UserId, Provider), ProviderConnection>,
}

impl InMemoryConnectionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConnectionStore for InMemoryConnectionStore {
    async fn get(&self, user_id: UserId, provider: Provider) -> Result<Option<ProviderConnection>> {
        Ok(self.rows.get(&(user_id, provider)).map(|r| r.value().clone()))
    }

    async fn upsert(&self, connection: ProviderConnection) -> Result<ProviderConnection> {
        self.rows
            .insert((connection.user_id, connection.provider), connection.clone());
        Ok(connection)
    }

    async fn update_tokens(
        &self,
        user_id: UserId,
        provider: Provider,
        access_token: String,
        refresh_token: String,
        token_expires_at: Timestamp,
        now: Timestamp,
    ) -> Result<ProviderConnection> {
        let mut entry = self.rows.get_mut(&(user_id, provider)).ok_or_else(|| NotFound {
            reason: format!("connection {user_id}/{provider}"),
        })?;
        entry.access_token = access_token;
        entry.refresh_token = refresh_token;
        entry.token_expires_at = token_expires_at;
        entry.last_refreshed_at = Some(now);
        Ok(entry.clone())
    }

    async fn set_status(
        &self,
        user_id: UserId,
        provider: Provider,
        status: ConnectionStatus,
    ) -> Result<ProviderConnection> {
        let mut entry = self.rows.get_mut(&(user_id, provider)).ok_or_else(|| NotFound {
            reason: format!("connection {user_id}/{provider}"),
        })?;
        entry.status = status;
        Ok(entry.clone())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryNotificationStore {
    rows: DashMap<UserNotificationId, UserNotification>,
}

impl InMemoryNotificationStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NotificationStore for InMemoryNotificationStore {
    async fn find_active(
        &self,
        user_id: UserId,
        notification_type: NotificationType,
        provider: Option<Provider>,
    ) -> Result<Option<UserNotification>> {
        Ok(self
            .rows
            .iter()
            .map(|r| r.value().clone())
            .find(|n| {
                n.user_id == user_id
                    && n.notification_type == notification_type
                    && n.provider == provider
                    && n.resolved_at.is_none()
            }))
    }

    async fn insert(&self, notification: UserNotification) -> Result<UserNotification> {
        self.rows.insert(notification.id, notification.clone());
        Ok(notification)
    }

    async fn resolve_active(
        &self,
        user_id: UserId,
        notification_type: NotificationType,
        provider: Option<Provider>,
        now: Timestamp,
    ) -> Result<u64> {
        let mut count = 0u64;
        for mut entry in self.rows.iter_mut() {
            let notification = entry.value_mut();
            if notification.user_id == user_id
                && notification.notification_type == notification_type
                && notification.provider == provider
                && notification.resolved_at.is_none()
            {
                notification.resolved_at = Some(now);
                count += 1;
            }
        }
        Ok(count)
    }

    async fn mark_read(
        &self,
        user_id: UserId,
        id: UserNotificationId,
        now: Timestamp,
    ) -> Result<UserNotification> {
        let mut entry = self.rows.get_mut(&id).ok_or_else(|| NotFound {
            reason: format!("notification {id}"),
        })?;
        if entry.user_id != user_id {
            return Err(NotFound {
                reason: format!("notification {id}"),
            }
            .into());
        }
        if entry.read_at.is_none() {
            entry.read_at = Some(now);
        }
        Ok(entry.clone())
    }

    async fn list(
        &self,
        user_id: UserId,
        unread_only: bool,
        limit: usize,
        cursor: Option<UserNotificationId>,
    ) -> Result<Page<UserNotification>> {
        let mut matching: Vec<UserNotification> = self
            .rows
            .iter()
            .filter(|r| {
                let n = r.value();
                n.user_id == user_id
                    && (!unread_only || (n.read_at.is_none() && n.resolved_at.is_none()))
                    && cursor.is_none_or(|c| n.id > c)
            })
            .map(|r| r.value().clone())
            .collect();
        matching.sort_by_key(|n| std::cmp::Reverse(n.id));
        let has_more = matching.len() > limit;
        matching.truncate(limit);
        let next_cursor = matching.last().map(|n| n.id.to_string());
        Ok(Page {
            items: matching,
            next_cursor,
            has_more,
        })
    }
}

#[derive(Debug, Default)]
pub struct InMemoryDlqStore {
    rows: DashMap<crate::types::DeadLetterQueueId, DeadLetterQueue>,
}

impl InMemoryDlqStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DlqStore for InMemoryDlqStore {
    async fn insert(&self, entry: DeadLetterQueue) -> Result<DeadLetterQueue> {
        self.rows.insert(entry.id, entry.clone());
        Ok(entry)
    }
}
