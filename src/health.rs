//! Connection health state machine: transitions `ProviderConnection.status`
//! on auth failure, tracks per-subscription poll failures, and manages
//! notification dedup/resolution.

use std::sync::Arc;

use crate::domain::UserNotification;
use crate::error::Kind;
use crate::kv::Kv;
use crate::store::{ConnectionStore, NotificationStore, SubscriptionStore};
use crate::time::Clock;
use crate::types::{ConnectionStatus, NotificationType, Provider, SubscriptionStatus, UserId, UserNotificationId};
use crate::Result;

/// Consecutive poll failures before a `poll_failures` notice is raised.
pub const POLL_FAILURE_THRESHOLD: u32 = 3;
const POLL_FAILURE_COUNTER_TTL_MILLIS: i64 = 24 * 60 * 60 * 1_000;

pub struct HealthMonitor {
    connections: Arc<dyn ConnectionStore>,
    subscriptions: Arc<dyn SubscriptionStore>,
    notifications: Arc<dyn NotificationStore>,
    kv: Arc<dyn Kv>,
    clock: Arc<dyn Clock>,
}

impl HealthMonitor {
    #[must_use]
    pub fn new(
        connections: Arc<dyn ConnectionStore>,
        subscriptions: Arc<dyn SubscriptionStore>,
        notifications: Arc<dyn NotificationStore>,
        kv: Arc<dyn Kv>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            connections,
            subscriptions,
            notifications,
            kv,
            clock,
        }
    }

    /// Reacts to an error surfaced while resolving a token or calling a
    /// provider on behalf of `(user_id, provider)`. Transient errors are a
    /// no-op here; auth errors drive the state machine.
    pub async fn observe_auth_error(
        &self,
        user_id: UserId,
        provider: Provider,
        error: &crate::Error,
    ) -> Result<()> {
        let (status, notification_type) = match error.kind() {
            Kind::Auth if error.downcast_ref::<crate::error::RefreshInvalid>().is_some() => {
                (ConnectionStatus::Expired, NotificationType::ConnectionExpired)
            }
            Kind::Auth if error.downcast_ref::<crate::error::AccessRevoked>().is_some() => {
                (ConnectionStatus::Revoked, NotificationType::ConnectionRevoked)
            }
            _ => return Ok(()),
        };

        let now = self.clock.now_millis();
        self.connections.set_status(user_id, provider, status).await?;
        self.subscriptions
            .set_status_for_connection(user_id, provider, SubscriptionStatus::Disconnected, now)
            .await?;
        self.raise_notification(user_id, notification_type, Some(provider), now)
            .await?;
        Ok(())
    }

    async fn raise_notification(
        &self,
        user_id: UserId,
        notification_type: NotificationType,
        provider: Option<Provider>,
        now: i64,
    ) -> Result<()> {
        if self
            .notifications
            .find_active(user_id, notification_type, provider)
            .await?
            .is_some()
        {
            return Ok(());
        }
        let (title, message) = notification_copy(notification_type, provider);
        self.notifications
            .insert(UserNotification {
                id: UserNotificationId::new(),
                user_id,
                notification_type,
                provider,
                title,
                message,
                data: None,
                read_at: None,
                resolved_at: None,
                created_at: now,
            })
            .await?;
        Ok(())
    }

    /// Increments the poll-failure counter for a subscription; raises a
    /// `poll_failures` notification once it reaches [`POLL_FAILURE_THRESHOLD`].
    pub async fn record_poll_failure(
        &self,
        user_id: UserId,
        provider: Provider,
        subscription_id: crate::types::SubscriptionId,
    ) -> Result<()> {
        let key = format!("poll:failures:{subscription_id}");
        let count = self.kv.counter_incr(&key, POLL_FAILURE_COUNTER_TTL_MILLIS).await?;
        if count >= u64::from(POLL_FAILURE_THRESHOLD) {
            let now = self.clock.now_millis();
            self.raise_notification(user_id, NotificationType::PollFailures, Some(provider), now)
                .await?;
        }
        Ok(())
    }

    /// Clears the poll-failure counter and resolves any active
    /// `poll_failures` notification for `(user, provider)`.
    pub async fn record_poll_success(
        &self,
        user_id: UserId,
        provider: Provider,
        subscription_id: crate::types::SubscriptionId,
    ) -> Result<()> {
        let key = format!("poll:failures:{subscription_id}");
        self.kv.counter_reset(&key).await?;
        let now = self.clock.now_millis();
        self.notifications
            .resolve_active(user_id, NotificationType::PollFailures, Some(provider), now)
            .await?;
        Ok(())
    }

    /// Resolves active expiry/revocation notices once a user re-authorizes.
    pub async fn observe_reconnect(&self, user_id: UserId, provider: Provider) -> Result<()> {
        let now = self.clock.now_millis();
        self.notifications
            .resolve_active(user_id, NotificationType::ConnectionExpired, Some(provider), now)
            .await?;
        self.notifications
            .resolve_active(user_id, NotificationType::ConnectionRevoked, Some(provider), now)
            .await?;
        Ok(())
    }
}

fn notification_copy(notification_type: NotificationType, provider: Option<Provider>) -> (String, String) {
    let provider_name = provider.map_or_else(|| "your account".to_owned(), |p| p.to_string());
    match notification_type {
        NotificationType::ConnectionExpired => (
            "Reconnect needed".to_owned(),
            format!("Your {provider_name} connection has expired. Reconnect to keep syncing."),
        ),
        NotificationType::ConnectionRevoked => (
            "Access revoked".to_owned(),
            format!("Access to {provider_name} was revoked. Reconnect to keep syncing."),
        ),
        NotificationType::PollFailures => (
            "Sync is failing".to_owned(),
            format!("We've had trouble syncing {provider_name} several times in a row."),
        ),
        NotificationType::QuotaWarning => (
            "Approaching sync limits".to_owned(),
            format!("{provider_name} sync is nearing its rate limit."),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ProviderConnection;
    use crate::error::{AccessRevoked, RefreshInvalid};
    use crate::kv::InMemoryKv;
    use crate::store::memory::{InMemoryConnectionStore, InMemoryNotificationStore, InMemorySubscriptionStore};
    use crate::time::ManualClock;
    use crate::types::{ProviderConnectionId, SubscriptionId};

    fn monitor() -> (HealthMonitor, Arc<InMemoryConnectionStore>, Arc<InMemoryNotificationStore>) {
        let connections = Arc::new(InMemoryConnectionStore::new());
        let subscriptions = Arc::new(InMemorySubscriptionStore::new());
        let notifications = Arc::new(InMemoryNotificationStore::new());
        let clock = Arc::new(ManualClock::new(0));
        let kv = Arc::new(InMemoryKv::new(clock.clone()));
        let monitor = HealthMonitor::new(
            connections.clone(),
            subscriptions,
            notifications.clone(),
            kv,
            clock,
        );
        (monitor, connections, notifications)
    }

    async fn seed_connection(store: &InMemoryConnectionStore, user_id: UserId) {
        store
            .upsert(ProviderConnection {
                id: ProviderConnectionId::new(),
                user_id,
                provider: Provider::Youtube,
                provider_user_id: None,
                access_token: "a".to_owned(),
                refresh_token: "r".to_owned(),
                token_expires_at: 0,
                scopes: None,
                status: ConnectionStatus::Active,
                connected_at: 0,
                last_refreshed_at: None,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn refresh_invalid_expires_connection_and_notifies_once() {
        let (monitor, connections, notifications) = monitor();
        let user_id = UserId::new();
        seed_connection(&connections, user_id).await;
        let err: crate::Error = RefreshInvalid.into();

        monitor.observe_auth_error(user_id, Provider::Youtube, &err).await.unwrap();
        monitor.observe_auth_error(user_id, Provider::Youtube, &err).await.unwrap();

        let connection = connections.get(user_id, Provider::Youtube).await.unwrap().unwrap();
        assert_eq!(connection.status, ConnectionStatus::Expired);

        let page = notifications.list(user_id, false, 10, None).await.unwrap();
        assert_eq!(page.items.len(), 1, "notification must be deduplicated");
    }

    #[tokio::test]
    async fn access_revoked_sets_revoked_status() {
        let (monitor, connections, _) = monitor();
        let user_id = UserId::new();
        seed_connection(&connections, user_id).await;
        let err: crate::Error = AccessRevoked.into();
        monitor.observe_auth_error(user_id, Provider::Youtube, &err).await.unwrap();
        let connection = connections.get(user_id, Provider::Youtube).await.unwrap().unwrap();
        assert_eq!(connection.status, ConnectionStatus::Revoked);
    }

    #[tokio::test]
    async fn poll_failures_notify_at_threshold_and_clear_on_success() {
        let (monitor, _, notifications) = monitor();
        let user_id = UserId::new();
        let sub_id = SubscriptionId::new();
        for _ in 0..3 {
            monitor.record_poll_failure(user_id, Provider::Youtube, sub_id).await.unwrap();
        }
        let page = notifications.list(user_id, false, 10, None).await.unwrap();
        assert_eq!(page.items.len(), 1);

        monitor.record_poll_success(user_id, Provider::Youtube, sub_id).await.unwrap();
        let page = notifications.list(user_id, true, 10, None).await.unwrap();
        assert_eq!(page.items.len(), 0, "success must resolve the active notice");
    }
}
