//! User-facing RPC surface: `subscriptions.*` and `notifications.*`.
//!
//! Every method here is one authenticated, per-user operation. None of them
//! touch the scheduler's cron lock; `syncNow`/`syncAll` use their own
//! per-subscription/per-user KV cooldowns instead.

use std::collections::HashMap;
use std::sync::Arc;

use crate::auth::TokenService;
use crate::domain::Subscription;
use crate::health::HealthMonitor;
use crate::ingestion::IngestionDeps;
use crate::initial_fetch::{fetch_spotify_welcome_item, fetch_youtube_welcome_item};
use crate::kv::Kv;
use crate::poller::{PollContext, Poller};
use crate::provider::spotify::SpotifyClient;
use crate::provider::youtube::YoutubeClient;
use crate::store::{
    ConnectionStore, CreatorStore, NotificationStore, Page, SubscriptionItemStore,
    SubscriptionStore, UserItemStore,
};
use crate::time::Clock;
use crate::types::{
    ConnectionStatus, Provider, SubscriptionId, SubscriptionStatus, UserId, UserNotificationId,
};
use crate::Error;

/// Error codes the operations surface returns to callers, per the RPC
/// contract. Distinct from [`crate::error::Kind`]: that taxonomy classifies
/// *recovery policy* inside the core, this one classifies *what to tell the
/// caller*.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpErrorCode {
    NotFound,
    BadRequest,
    PreconditionFailed,
    TooManyRequests,
    InternalServerError,
}

#[derive(Debug, Clone)]
pub struct OpError {
    pub code: OpErrorCode,
    pub message: String,
}

impl OpError {
    fn new(code: OpErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for OpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for OpError {}

impl From<Error> for OpError {
    fn from(err: Error) -> Self {
        let code = match err.kind() {
            crate::error::Kind::NotFound => OpErrorCode::NotFound,
            crate::error::Kind::Validation => OpErrorCode::BadRequest,
            crate::error::Kind::RateLimited => OpErrorCode::TooManyRequests,
            crate::error::Kind::Auth => OpErrorCode::PreconditionFailed,
            crate::error::Kind::Transient
            | crate::error::Kind::Unavailable
            | crate::error::Kind::Internal => OpErrorCode::InternalServerError,
        };
        OpError::new(code, err.to_string())
    }
}

pub type OpResult<T> = Result<T, OpError>;

/// One item of a `discover.available`/`discover.search` result.
#[derive(Debug, Clone)]
pub struct DiscoverItem {
    pub provider_channel_id: String,
    pub name: String,
    pub image_url: Option<String>,
    pub is_subscribed: bool,
}

/// Per-provider remote-catalog lookup backing the discovery operations.
/// Kept out of [`crate::provider`] because it's a router-level concern
/// (ownership join against local subscriptions), not a poll-time one.
#[async_trait::async_trait]
pub trait Discovery: Send + Sync {
    async fn available(&self, access_token: &str) -> crate::Result<Vec<DiscoverItem>>;
    async fn search(&self, access_token: &str, query: &str, limit: usize) -> crate::Result<Vec<DiscoverItem>>;
}

const YOUTUBE_SYNC_ALL_CAP: usize = 20;
const SPOTIFY_SYNC_ALL_CAP: usize = 30;

pub struct OperationsRouter {
    subscriptions: Arc<dyn SubscriptionStore>,
    subscription_items: Arc<dyn SubscriptionItemStore>,
    user_items: Arc<dyn UserItemStore>,
    connections: Arc<dyn ConnectionStore>,
    creators: Arc<dyn CreatorStore>,
    notifications: Arc<dyn NotificationStore>,
    token_service: Arc<TokenService>,
    health: Arc<HealthMonitor>,
    kv: Arc<dyn Kv>,
    clock: Arc<dyn Clock>,
    ingestion: IngestionDeps,
    youtube_client_factory: Arc<dyn Fn(String) -> YoutubeClient + Send + Sync>,
    spotify_client_factory: Arc<dyn Fn(String) -> SpotifyClient + Send + Sync>,
    discovery: HashMap<Provider, Arc<dyn Discovery>>,
    pollers: HashMap<Provider, Arc<dyn Poller>>,
    manual_sync_cooldown_millis: i64,
    sync_all_cooldown_millis: i64,
}

/// Built via [`OperationsRouter::builder`] — with fourteen collaborators to
/// wire up, a positional constructor stopped being readable at the call
/// site long before clippy started complaining about it.
#[bon::bon]
impl OperationsRouter {
    #[builder]
    #[must_use]
    pub fn new(
        subscriptions: Arc<dyn SubscriptionStore>,
        subscription_items: Arc<dyn SubscriptionItemStore>,
        user_items: Arc<dyn UserItemStore>,
        connections: Arc<dyn ConnectionStore>,
        creators: Arc<dyn CreatorStore>,
        notifications: Arc<dyn NotificationStore>,
        token_service: Arc<TokenService>,
        health: Arc<HealthMonitor>,
        kv: Arc<dyn Kv>,
        clock: Arc<dyn Clock>,
        ingestion: IngestionDeps,
        youtube_client_factory: Arc<dyn Fn(String) -> YoutubeClient + Send + Sync>,
        spotify_client_factory: Arc<dyn Fn(String) -> SpotifyClient + Send + Sync>,
        #[builder(default)] pollers: HashMap<Provider, Arc<dyn Poller>>,
    ) -> Self {
        Self {
            subscriptions,
            subscription_items,
            user_items,
            connections,
            creators,
            notifications,
            token_service,
            health,
            kv,
            clock,
            ingestion,
            youtube_client_factory,
            spotify_client_factory,
            discovery: HashMap::new(),
            pollers,
            manual_sync_cooldown_millis: crate::config::DEFAULT_MANUAL_SYNC_COOLDOWN.as_millis() as i64,
            sync_all_cooldown_millis: crate::config::DEFAULT_SYNC_ALL_COOLDOWN.as_millis() as i64,
        }
    }

    #[must_use]
    pub fn with_cooldowns(mut self, manual_sync: std::time::Duration, sync_all: std::time::Duration) -> Self {
        self.manual_sync_cooldown_millis = manual_sync.as_millis() as i64;
        self.sync_all_cooldown_millis = sync_all.as_millis() as i64;
        self
    }

    pub fn register_discovery(&mut self, provider: Provider, discovery: Arc<dyn Discovery>) {
        self.discovery.insert(provider, discovery);
    }

    pub async fn list(
        &self,
        user_id: UserId,
        provider: Option<Provider>,
        status: Option<SubscriptionStatus>,
        limit: usize,
        cursor: Option<String>,
    ) -> OpResult<Page<Subscription>> {
        let cursor = parse_id::<SubscriptionId>(cursor)?;
        let limit = limit.clamp(1, 100);
        Ok(self
            .subscriptions
            .list_by_user(user_id, provider, status, limit, cursor)
            .await?)
    }

    /// Requires an `ACTIVE` connection for `provider`; reactivates a prior
    /// `UNSUBSCRIBED` row if one exists, otherwise creates a fresh one, then
    /// runs the Initial Fetch before returning. `name`/`image_url` seed the
    /// subscription's creator display fields (see [`Self::seed_creator`]);
    /// they're the only identity RSS/Web creators have at all.
    pub async fn add(
        &self,
        user_id: UserId,
        provider: Provider,
        provider_channel_id: String,
        name: Option<String>,
        image_url: Option<String>,
    ) -> OpResult<Subscription> {
        let connection = self
            .connections
            .get(user_id, provider)
            .await?
            .filter(|c| c.status == ConnectionStatus::Active)
            .ok_or_else(|| OpError::new(OpErrorCode::PreconditionFailed, "no active connection"))?;

        let now = self.clock.now_millis();
        let existing = self
            .subscriptions
            .find_by_channel(user_id, provider, &provider_channel_id)
            .await?;

        let mut subscription = match existing {
            Some(mut sub) => {
                sub.status = SubscriptionStatus::Active;
                sub.disconnected_at = None;
                sub.disconnected_reason = None;
                sub.updated_at = now;
                self.subscriptions.upsert(sub).await?
            }
            None => {
                self.subscriptions
                    .upsert(Subscription {
                        id: SubscriptionId::new(),
                        user_id,
                        provider,
                        provider_channel_id: provider_channel_id.clone(),
                        creator_id: None,
                        total_items: None,
                        last_published_at: None,
                        last_polled_at: None,
                        poll_interval_seconds: crate::config::DEFAULT_INITIAL_POLL_INTERVAL.as_secs(),
                        status: SubscriptionStatus::Active,
                        disconnected_at: None,
                        disconnected_reason: None,
                        created_at: now,
                        updated_at: now,
                    })
                    .await?
            }
        };

        let ctx = self.poll_context();
        match provider {
            Provider::Youtube => {
                let client = (self.youtube_client_factory)(connection.access_token.clone());
                fetch_youtube_welcome_item(&ctx, &client, user_id, &subscription).await;
            }
            Provider::Spotify => {
                let client = (self.spotify_client_factory)(connection.access_token.clone());
                fetch_spotify_welcome_item(&ctx, &client, user_id, &subscription).await;
            }
            Provider::Rss | Provider::Web => {}
        }

        // Runs after the Initial Fetch so caller-supplied display fields win
        // over the placeholder name YouTube/Spotify ingestion seeds a
        // creator with before its real metadata is available.
        if let Some(creator_id) = self
            .seed_creator(provider, &provider_channel_id, name, image_url, now)
            .await?
        {
            subscription.creator_id = Some(creator_id);
            subscription.updated_at = now;
            subscription = self.subscriptions.update(subscription).await?;
        }

        Ok(self
            .subscriptions
            .get(subscription.id)
            .await?
            .unwrap_or(subscription))
    }

    /// Finds or creates the creator backing a subscription and applies
    /// caller-supplied `name`/`image_url`: `name` always wins when given and
    /// different, `image_url` only fills a previously-null one. YouTube and
    /// Spotify key on their native channel/show id; RSS and Web have none,
    /// so they key on [`crate::domain::derive_creator_id`] of `name` and are
    /// skipped entirely when no `name` is given.
    async fn seed_creator(
        &self,
        provider: Provider,
        provider_channel_id: &str,
        name: Option<String>,
        image_url: Option<String>,
        now: i64,
    ) -> OpResult<Option<crate::types::CreatorId>> {
        let name = name.filter(|n| !n.trim().is_empty());

        let provider_creator_id = if provider.has_native_creator_id() {
            provider_channel_id.to_owned()
        } else {
            let Some(name) = name.as_deref() else {
                return Ok(None);
            };
            crate::domain::derive_creator_id(provider, name)
        };

        if let Some(mut existing) = self
            .creators
            .find_by_provider_id(provider, &provider_creator_id)
            .await?
        {
            let mut changed = false;
            if let Some(name) = name.clone() {
                if existing.name != name {
                    existing.name = name;
                    changed = true;
                }
            }
            if existing.image_url.is_none() && image_url.is_some() {
                existing.image_url = image_url;
                changed = true;
            }
            if !changed {
                return Ok(Some(existing.id));
            }
            existing.updated_at = now;
            let updated = self.creators.update(existing).await?;
            return Ok(Some(updated.id));
        }

        let Some(name) = name else {
            return Ok(None);
        };
        let creator = crate::domain::Creator {
            id: crate::types::CreatorId::new(),
            provider,
            provider_creator_id,
            normalized_name: name.trim().to_lowercase(),
            name,
            image_url,
            handle: None,
            external_url: None,
            description: None,
            created_at: now,
            updated_at: now,
        };
        let inserted = self.creators.insert(creator).await?;
        Ok(Some(inserted.id))
    }

    /// Unsubscribes: sets `status=UNSUBSCRIBED`, deletes `SubscriptionItem`
    /// rows, and deletes only `INBOX`-state `UserItem` rows; `ProviderItemsSeen`
    /// is preserved so a resubscribe can never re-deliver the same item.
    pub async fn remove(&self, user_id: UserId, subscription_id: SubscriptionId) -> OpResult<()> {
        let subscription = self.owned_subscription(user_id, subscription_id).await?;
        let now = self.clock.now_millis();

        let items: Vec<crate::types::ItemId> = self
            .subscription_items
            .recent(subscription_id, usize::MAX)
            .await?
            .into_iter()
            .map(|row| row.item_id)
            .collect();

        self.subscription_items.delete_for_subscription(subscription_id).await?;
        self.user_items.delete_inbox_for_items(&items, user_id).await?;

        let mut updated = subscription;
        updated.status = SubscriptionStatus::Unsubscribed;
        updated.updated_at = now;
        self.subscriptions.update(updated).await?;
        Ok(())
    }

    pub async fn pause(&self, user_id: UserId, subscription_id: SubscriptionId) -> OpResult<()> {
        let mut subscription = self.owned_subscription(user_id, subscription_id).await?;
        subscription.status = SubscriptionStatus::Paused;
        subscription.updated_at = self.clock.now_millis();
        self.subscriptions.update(subscription).await?;
        Ok(())
    }

    /// Resumes a paused subscription, rechecking the underlying connection
    /// is still active.
    pub async fn resume(&self, user_id: UserId, subscription_id: SubscriptionId) -> OpResult<()> {
        let mut subscription = self.owned_subscription(user_id, subscription_id).await?;
        let connection = self
            .connections
            .get(user_id, subscription.provider)
            .await?
            .filter(|c| c.status == ConnectionStatus::Active)
            .ok_or_else(|| OpError::new(OpErrorCode::PreconditionFailed, "no active connection"))?;
        let _ = connection;
        subscription.status = SubscriptionStatus::Active;
        subscription.updated_at = self.clock.now_millis();
        self.subscriptions.update(subscription).await?;
        Ok(())
    }

    /// Polls one subscription immediately, gated by a 1-per-5-min KV cooldown.
    pub async fn sync_now(&self, user_id: UserId, subscription_id: SubscriptionId) -> OpResult<u32> {
        let subscription = self.owned_subscription(user_id, subscription_id).await?;
        if subscription.status != SubscriptionStatus::Active {
            return Err(OpError::new(
                OpErrorCode::PreconditionFailed,
                "subscription is not active",
            ));
        }

        let lock_key = format!("manual-sync:{subscription_id}");
        if !self
            .kv
            .try_lock(&lock_key, self.manual_sync_cooldown_millis)
            .await?
        {
            return Err(OpError::new(
                OpErrorCode::TooManyRequests,
                "sync was requested too recently for this subscription",
            ));
        }

        let access_token = self
            .token_service
            .get_valid_token(user_id, subscription.provider)
            .await
            .map_err(|err| {
                if err.kind() == crate::error::Kind::Auth {
                    OpError::new(OpErrorCode::PreconditionFailed, "connection needs to be reauthorized")
                } else {
                    OpError::from(err)
                }
            })?;

        let Some(poller) = self.pollers.get(&subscription.provider).cloned() else {
            return Err(OpError::new(
                OpErrorCode::BadRequest,
                "no poller registered for this provider",
            ));
        };

        let ctx = self.poll_context();
        let outcome = poller
            .poll_single(&ctx, user_id, &access_token, &subscription)
            .await?;
        Ok(outcome.new_items)
    }

    /// Polls every due-or-not subscription for the user, grouped by
    /// provider, gated by a 1-per-2-min KV cooldown, and capped per group so
    /// one invocation never exceeds the outbound-connection budget.
    pub async fn sync_all(&self, user_id: UserId) -> OpResult<SyncAllResult> {
        let lock_key = format!("sync-all:{user_id}");
        if !self.kv.try_lock(&lock_key, self.sync_all_cooldown_millis).await? {
            return Err(OpError::new(
                OpErrorCode::TooManyRequests,
                "syncAll was requested too recently",
            ));
        }

        let page = self
            .subscriptions
            .list_by_user(user_id, None, Some(SubscriptionStatus::Active), 500, None)
            .await?;

        let mut by_provider: HashMap<Provider, Vec<Subscription>> = HashMap::new();
        for sub in page.items {
            by_provider.entry(sub.provider).or_default().push(sub);
        }

        let mut result = SyncAllResult::default();
        let ctx = self.poll_context();
        for (provider, mut subs) in by_provider {
            subs.sort_by_key(|sub| (sub.last_polled_at.is_some(), sub.last_polled_at));
            let cap = match provider {
                Provider::Youtube => YOUTUBE_SYNC_ALL_CAP,
                Provider::Spotify => SPOTIFY_SYNC_ALL_CAP,
                Provider::Rss | Provider::Web => subs.len(),
            };
            let remaining_after_cap = subs.len().saturating_sub(cap);
            if remaining_after_cap > 0 {
                result.has_more_to_sync = true;
                result.remaining += remaining_after_cap as u32;
            }
            subs.truncate(cap);

            let Some(poller) = self.pollers.get(&provider).cloned() else {
                continue;
            };
            let access_token = match self.token_service.get_valid_token(user_id, provider).await {
                Ok(token) => token,
                Err(err) => {
                    if err.kind() == crate::error::Kind::Auth {
                        self.health.observe_auth_error(user_id, provider, &err).await?;
                    }
                    result.errors.push(format!("{provider}: {err}"));
                    continue;
                }
            };

            let outcomes = poller.poll_batch(&ctx, user_id, &access_token, &subs).await;
            for sub in &subs {
                match outcomes.get(&sub.id) {
                    Some(Ok(outcome)) => {
                        result.synced += 1;
                        result.items_found += outcome.new_items;
                    }
                    Some(Err(err)) => {
                        result.errors.push(format!("{}: {err}", sub.id));
                    }
                    None => {}
                }
            }
        }

        Ok(result)
    }

    pub async fn discover_available(
        &self,
        user_id: UserId,
        provider: Provider,
    ) -> OpResult<Vec<DiscoverItem>> {
        let discovery = self
            .discovery
            .get(&provider)
            .cloned()
            .ok_or_else(|| OpError::new(OpErrorCode::BadRequest, "discovery not supported for provider"))?;
        let access_token = self.token_service.get_valid_token(user_id, provider).await?;
        let items = discovery.available(&access_token).await?;
        self.mark_subscribed(user_id, provider, items).await
    }

    pub async fn discover_search(
        &self,
        user_id: UserId,
        provider: Provider,
        query: &str,
        limit: usize,
    ) -> OpResult<Vec<DiscoverItem>> {
        let discovery = self
            .discovery
            .get(&provider)
            .cloned()
            .ok_or_else(|| OpError::new(OpErrorCode::BadRequest, "discovery not supported for provider"))?;
        let access_token = self.token_service.get_valid_token(user_id, provider).await?;
        let items = discovery.search(&access_token, query, limit.clamp(1, 20)).await?;
        self.mark_subscribed(user_id, provider, items).await
    }

    pub async fn notifications_list(
        &self,
        user_id: UserId,
        unread_only: bool,
        limit: usize,
        cursor: Option<String>,
    ) -> OpResult<Page<crate::domain::UserNotification>> {
        let cursor = parse_id::<UserNotificationId>(cursor)?;
        let limit = limit.clamp(1, 100);
        Ok(self.notifications.list(user_id, unread_only, limit, cursor).await?)
    }

    /// Idempotent: marking an already-read notification is a no-op success.
    pub async fn notifications_mark_read(
        &self,
        user_id: UserId,
        notification_id: UserNotificationId,
    ) -> OpResult<()> {
        let now = self.clock.now_millis();
        self.notifications.mark_read(user_id, notification_id, now).await?;
        Ok(())
    }

    async fn owned_subscription(
        &self,
        user_id: UserId,
        subscription_id: SubscriptionId,
    ) -> OpResult<Subscription> {
        let subscription = self
            .subscriptions
            .get(subscription_id)
            .await?
            .ok_or_else(|| OpError::new(OpErrorCode::NotFound, "subscription not found"))?;
        if subscription.user_id != user_id {
            return Err(OpError::new(OpErrorCode::NotFound, "subscription not found"));
        }
        Ok(subscription)
    }

    async fn mark_subscribed(
        &self,
        user_id: UserId,
        provider: Provider,
        items: Vec<DiscoverItem>,
    ) -> OpResult<Vec<DiscoverItem>> {
        let mut out = Vec::with_capacity(items.len());
        for mut item in items {
            let subscribed = self
                .subscriptions
                .find_by_channel(user_id, provider, &item.provider_channel_id)
                .await?
                .is_some_and(|sub| sub.status != SubscriptionStatus::Unsubscribed);
            item.is_subscribed = subscribed;
            out.push(item);
        }
        Ok(out)
    }

    fn poll_context(&self) -> PollContext {
        PollContext {
            ingestion: IngestionDeps {
                seen: self.ingestion.seen.clone(),
                items: self.ingestion.items.clone(),
                creators: self.creators.clone(),
                user_items: self.user_items.clone(),
                subscription_items: self.subscription_items.clone(),
                dlq: self.ingestion.dlq.clone(),
                clock: self.clock.clone(),
            },
            subscriptions: self.subscriptions.clone(),
            kv: self.kv.clone(),
            clock: self.clock.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SyncAllResult {
    pub synced: u32,
    pub items_found: u32,
    pub errors: Vec<String>,
    pub has_more_to_sync: bool,
    pub remaining: u32,
}

fn parse_id<T: From<uuid::Uuid>>(cursor: Option<String>) -> OpResult<Option<T>> {
    cursor
        .map(|raw| {
            uuid::Uuid::parse_str(&raw)
                .map(T::from)
                .map_err(|_| OpError::new(OpErrorCode::BadRequest, "invalid cursor"))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ProviderConnection;
    use crate::health::HealthMonitor;
    use crate::kv::InMemoryKv;
    use crate::provider::spotify::SpotifyClient;
    use crate::provider::youtube::YoutubeClient;
    use crate::store::memory::{
        InMemoryConnectionStore, InMemoryCreatorStore, InMemoryDlqStore, InMemoryItemStore,
        InMemoryNotificationStore, InMemorySeenStore, InMemorySubscriptionItemStore,
        InMemorySubscriptionStore, InMemoryUserItemStore,
    };
    use crate::time::ManualClock;
    use crate::types::ProviderConnectionId;

    fn router(clock: Arc<ManualClock>) -> (OperationsRouter, Arc<InMemoryConnectionStore>, Arc<InMemorySubscriptionStore>) {
        let subscriptions = Arc::new(InMemorySubscriptionStore::new());
        let subscription_items = Arc::new(InMemorySubscriptionItemStore::new());
        let user_items = Arc::new(InMemoryUserItemStore::new());
        let connections = Arc::new(InMemoryConnectionStore::new());
        let creators = Arc::new(InMemoryCreatorStore::new());
        let notifications = Arc::new(InMemoryNotificationStore::new());
        let kv: Arc<dyn Kv> = Arc::new(InMemoryKv::new(clock.clone()));
        let health = Arc::new(HealthMonitor::new(
            connections.clone(),
            subscriptions.clone(),
            notifications.clone(),
            kv.clone(),
            clock.clone(),
        ));
        let token_service = Arc::new(TokenService::new(connections.clone(), clock.clone()));

        let ingestion = IngestionDeps {
            seen: Arc::new(InMemorySeenStore::new()),
            items: Arc::new(InMemoryItemStore::new()),
            creators: creators.clone(),
            user_items: user_items.clone(),
            subscription_items: subscription_items.clone(),
            dlq: Arc::new(InMemoryDlqStore::new()),
            clock: clock.clone(),
        };

        let router = OperationsRouter::builder()
            .subscriptions(subscriptions.clone())
            .subscription_items(subscription_items)
            .user_items(user_items)
            .connections(connections.clone())
            .creators(creators)
            .notifications(notifications)
            .token_service(token_service)
            .health(health)
            .kv(kv)
            .clock(clock)
            .ingestion(ingestion)
            .youtube_client_factory(Arc::new(|token: String| YoutubeClient::new(reqwest::Client::new(), token)))
            .spotify_client_factory(Arc::new(|token: String| SpotifyClient::new(reqwest::Client::new(), token)))
            .build();
        (router, connections, subscriptions)
    }

    #[tokio::test]
    async fn add_without_active_connection_is_precondition_failed() {
        let clock = Arc::new(ManualClock::new(0));
        let (router, _connections, _subs) = router(clock);
        let err = router
            .add(UserId::new(), Provider::Youtube, "UCabc".to_owned(), None, None)
            .await
            .unwrap_err();
        assert_eq!(err.code, OpErrorCode::PreconditionFailed);
    }

    #[tokio::test]
    async fn remove_unknown_subscription_is_not_found() {
        let clock = Arc::new(ManualClock::new(0));
        let (router, _connections, _subs) = router(clock);
        let err = router
            .remove(UserId::new(), SubscriptionId::new())
            .await
            .unwrap_err();
        assert_eq!(err.code, OpErrorCode::NotFound);
    }

    #[tokio::test]
    async fn sync_now_is_rate_limited_on_second_call() {
        let clock = Arc::new(ManualClock::new(0));
        let (router, connections, subscriptions) = router(clock.clone());
        let user_id = UserId::new();
        connections
            .upsert(ProviderConnection {
                id: ProviderConnectionId::new(),
                user_id,
                provider: Provider::Youtube,
                provider_user_id: None,
                access_token: "token".to_owned(),
                refresh_token: "refresh".to_owned(),
                token_expires_at: 10 * 60 * 60 * 1_000,
                scopes: None,
                status: ConnectionStatus::Active,
                connected_at: 0,
                last_refreshed_at: None,
            })
            .await
            .unwrap();
        let subscription = Subscription {
            id: SubscriptionId::new(),
            user_id,
            provider: Provider::Youtube,
            provider_channel_id: "UCabc".to_owned(),
            creator_id: None,
            total_items: None,
            last_published_at: None,
            last_polled_at: None,
            poll_interval_seconds: 3_600,
            status: SubscriptionStatus::Active,
            disconnected_at: None,
            disconnected_reason: None,
            created_at: 0,
            updated_at: 0,
        };
        let subscription_id = subscription.id;
        subscriptions.upsert(subscription).await.unwrap();

        let mut router = router;
        router.pollers.insert(
            Provider::Youtube,
            Arc::new(crate::poller::youtube::YoutubePoller::new(Arc::new(|token| {
                YoutubeClient::new(reqwest::Client::new(), token)
            }))),
        );

        // No registered refresher means a token refresh would fail, but the
        // connection is outside its buffer so this reads the stored token.
        let first = router.sync_now(user_id, subscription_id).await;
        assert!(first.is_err() || first.is_ok());
        let second = router.sync_now(user_id, subscription_id).await;
        assert_eq!(second.unwrap_err().code, OpErrorCode::TooManyRequests);
    }

    #[tokio::test]
    async fn add_seeds_creator_from_name_and_image_url() {
        let clock = Arc::new(ManualClock::new(0));
        let (router, connections, _subs) = router(clock);
        let user_id = UserId::new();
        connections
            .upsert(ProviderConnection {
                id: ProviderConnectionId::new(),
                user_id,
                provider: Provider::Youtube,
                provider_user_id: None,
                access_token: "token".to_owned(),
                refresh_token: "refresh".to_owned(),
                token_expires_at: 10 * 60 * 60 * 1_000,
                scopes: None,
                status: ConnectionStatus::Active,
                connected_at: 0,
                last_refreshed_at: None,
            })
            .await
            .unwrap();

        let subscription = router
            .add(
                user_id,
                Provider::Youtube,
                "UCabc".to_owned(),
                Some("Cool Channel".to_owned()),
                Some("https://img/ch.jpg".to_owned()),
            )
            .await
            .unwrap();

        let creator_id = subscription.creator_id.expect("add seeds a creator");
        let creator = router.creators.get(creator_id).await.unwrap().expect("creator row exists");
        assert_eq!(creator.name, "Cool Channel");
        assert_eq!(creator.image_url.as_deref(), Some("https://img/ch.jpg"));
    }

    #[tokio::test]
    async fn add_without_name_skips_creator_seeding_for_providerless_channel() {
        let clock = Arc::new(ManualClock::new(0));
        let (router, connections, _subs) = router(clock);
        let user_id = UserId::new();
        connections
            .upsert(ProviderConnection {
                id: ProviderConnectionId::new(),
                user_id,
                provider: Provider::Rss,
                provider_user_id: None,
                access_token: "token".to_owned(),
                refresh_token: "refresh".to_owned(),
                token_expires_at: 10 * 60 * 60 * 1_000,
                scopes: None,
                status: ConnectionStatus::Active,
                connected_at: 0,
                last_refreshed_at: None,
            })
            .await
            .unwrap();

        let subscription = router
            .add(user_id, Provider::Rss, "https://example.com/feed".to_owned(), None, None)
            .await
            .unwrap();
        assert!(subscription.creator_id.is_none(), "no name means nothing to key the creator on");
    }

    #[tokio::test]
    async fn add_derives_a_synthetic_creator_id_for_providerless_feeds() {
        let clock = Arc::new(ManualClock::new(0));
        let (router, connections, _subs) = router(clock);
        let user_id = UserId::new();
        connections
            .upsert(ProviderConnection {
                id: ProviderConnectionId::new(),
                user_id,
                provider: Provider::Rss,
                provider_user_id: None,
                access_token: "token".to_owned(),
                refresh_token: "refresh".to_owned(),
                token_expires_at: 10 * 60 * 60 * 1_000,
                scopes: None,
                status: ConnectionStatus::Active,
                connected_at: 0,
                last_refreshed_at: None,
            })
            .await
            .unwrap();

        let subscription = router
            .add(
                user_id,
                Provider::Rss,
                "https://example.com/feed".to_owned(),
                Some("Example Feed".to_owned()),
                None,
            )
            .await
            .unwrap();

        let creator_id = subscription.creator_id.expect("name seeds a synthetic creator");
        let creator = router.creators.get(creator_id).await.unwrap().expect("creator row exists");
        assert_eq!(creator.provider_creator_id, crate::domain::derive_creator_id(Provider::Rss, "Example Feed"));
    }

    #[tokio::test]
    async fn notifications_mark_read_on_unowned_notification_is_not_found() {
        let clock = Arc::new(ManualClock::new(0));
        let (router, _connections, _subs) = router(clock);
        let err = router
            .notifications_mark_read(UserId::new(), UserNotificationId::new())
            .await
            .unwrap_err();
        assert_eq!(err.code, OpErrorCode::NotFound);
    }
}
