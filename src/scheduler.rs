//! Cron entry point: acquires the singleton lock, finds due subscriptions,
//! dispatches each `(user, provider)` group to its poller, and always
//! releases the lock and advances `lastPolledAt` regardless of outcome.

use std::collections::HashMap;
use std::sync::Arc;

use crate::auth::TokenService;
use crate::domain::Subscription;
use crate::error::Kind;
use crate::health::HealthMonitor;
use crate::ingestion::IngestionDeps;
use crate::kv::Kv;
use crate::poller::{PollContext, Poller};
use crate::ratelimit::RateLimiter;
use crate::store::SubscriptionStore;
use crate::time::Clock;
use crate::types::{Provider, UserId};
use crate::Result;

pub const CRON_LOCK_KEY: &str = "cron:poll-subscriptions:lock";
pub const CRON_LOCK_TTL_MILLIS: i64 = 900_000;

#[derive(Debug, Clone, Default)]
pub struct SchedulerRunResult {
    pub processed: u32,
    pub new_items: u32,
    pub disconnected: u32,
    pub errors: Vec<String>,
    pub skipped: Option<String>,
}

pub struct SchedulerDeps {
    pub subscriptions: Arc<dyn SubscriptionStore>,
    pub rate_limiter: Arc<dyn RateLimiter>,
    pub token_service: Arc<TokenService>,
    pub health: Arc<HealthMonitor>,
    pub pollers: HashMap<Provider, Arc<dyn Poller>>,
    pub kv: Arc<dyn Kv>,
    pub ingestion: IngestionDeps,
    pub clock: Arc<dyn Clock>,
}

pub struct Scheduler {
    deps: SchedulerDeps,
}

impl Scheduler {
    #[must_use]
    pub fn new(deps: SchedulerDeps) -> Self {
        Self { deps }
    }

    /// Runs one cron tick. Never propagates a per-subscription failure to
    /// the caller; the only `Err` this returns is a lock or store failure
    /// that happened before any subscription was touched.
    pub async fn run(&self) -> Result<SchedulerRunResult> {
        if !self.deps.kv.try_lock(CRON_LOCK_KEY, CRON_LOCK_TTL_MILLIS).await? {
            return Ok(SchedulerRunResult {
                skipped: Some("lock_held".to_owned()),
                ..Default::default()
            });
        }

        let result = self.run_locked().await;
        self.deps.kv.unlock(CRON_LOCK_KEY).await?;

        let run_result = result?;
        tracing::info!(
            processed = run_result.processed,
            new_items = run_result.new_items,
            disconnected = run_result.disconnected,
            errors = run_result.errors.len(),
            skipped = run_result.skipped.as_deref().unwrap_or(""),
            "poll run complete"
        );
        Ok(run_result)
    }

    async fn run_locked(&self) -> Result<SchedulerRunResult> {
        let now = self.deps.clock.now_millis();
        let due = self.deps.subscriptions.list_due(now).await?;
        let groups = group_by_user_provider(due);

        let mut result = SchedulerRunResult::default();
        for ((user_id, provider), subs) in groups {
            if !self.deps.rate_limiter.allow(provider, user_id).await? {
                continue;
            }

            let token = match self.deps.token_service.get_valid_token(user_id, provider).await {
                Ok(token) => token,
                Err(err) => {
                    if matches!(err.kind(), Kind::Auth) {
                        self.deps.health.observe_auth_error(user_id, provider, &err).await?;
                    }
                    continue;
                }
            };

            let Some(poller) = self.deps.pollers.get(&provider).cloned() else {
                continue;
            };

            let ctx = PollContext {
                ingestion: clone_ingestion_deps(&self.deps.ingestion),
                subscriptions: self.deps.subscriptions.clone(),
                kv: self.deps.kv.clone(),
                clock: self.deps.clock.clone(),
            };

            let outcomes = poller.poll_batch(&ctx, user_id, &token, &subs).await;
            for sub in &subs {
                match outcomes.get(&sub.id) {
                    Some(Ok(outcome)) => {
                        result.processed += 1;
                        result.new_items += outcome.new_items;
                        if outcome.disconnected {
                            result.disconnected += 1;
                        } else {
                            self.deps
                                .health
                                .record_poll_success(user_id, provider, sub.id)
                                .await?;
                        }
                    }
                    Some(Err(err)) => {
                        result.errors.push(format!("{}: {err}", sub.id));
                        self.deps
                            .health
                            .record_poll_failure(user_id, provider, sub.id)
                            .await?;
                        advance_last_polled_at(&self.deps, sub, now).await?;
                    }
                    None => {}
                }
            }
        }

        Ok(result)
    }
}

/// `lastPolledAt` is always advanced after an attempt, even a failed one,
/// so a persistently-erroring subscription doesn't get re-selected on the
/// very next tick.
async fn advance_last_polled_at(deps: &SchedulerDeps, sub: &Subscription, now: i64) -> Result<()> {
    let mut updated = sub.clone();
    updated.last_polled_at = Some(now);
    updated.updated_at = now;
    deps.subscriptions.update(updated).await?;
    Ok(())
}

fn group_by_user_provider(
    subs: Vec<Subscription>,
) -> Vec<((UserId, Provider), Vec<Subscription>)> {
    let mut groups: Vec<((UserId, Provider), Vec<Subscription>)> = Vec::new();
    for sub in subs {
        let key = (sub.user_id, sub.provider);
        if let Some(existing) = groups.iter_mut().find(|(k, _)| *k == key) {
            existing.1.push(sub);
        } else {
            groups.push((key, vec![sub]));
        }
    }
    groups
}

fn clone_ingestion_deps(deps: &IngestionDeps) -> IngestionDeps {
    IngestionDeps {
        seen: deps.seen.clone(),
        items: deps.items.clone(),
        creators: deps.creators.clone(),
        user_items: deps.user_items.clone(),
        subscription_items: deps.subscription_items.clone(),
        dlq: deps.dlq.clone(),
        clock: deps.clock.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ProviderConnection, Subscription};
    use crate::health::HealthMonitor;
    use crate::kv::InMemoryKv;
    use crate::poller::PollOutcome;
    use crate::ratelimit::TokenBucketRateLimiter;
    use crate::store::memory::{
        InMemoryConnectionStore, InMemoryCreatorStore, InMemoryDlqStore, InMemoryItemStore,
        InMemoryNotificationStore, InMemorySeenStore, InMemorySubscriptionItemStore,
        InMemorySubscriptionStore, InMemoryUserItemStore,
    };
    use crate::time::ManualClock;
    use crate::store::traits::ConnectionStore;
    use crate::types::{ConnectionStatus, ProviderConnectionId, SubscriptionId, SubscriptionStatus};
    use async_trait::async_trait;

    struct StubPoller {
        outcome: PollOutcome,
    }

    #[async_trait]
    impl Poller for StubPoller {
        async fn poll_single(
            &self,
            _ctx: &PollContext,
            _user_id: UserId,
            _access_token: &str,
            _sub: &Subscription,
        ) -> Result<PollOutcome> {
            Ok(self.outcome.clone())
        }
    }

    fn sub(user_id: UserId, provider: Provider) -> Subscription {
        Subscription {
            id: SubscriptionId::new(),
            user_id,
            provider,
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
        }
    }

    fn connection(user_id: UserId, provider: Provider, now: i64) -> ProviderConnection {
        ProviderConnection {
            id: ProviderConnectionId::new(),
            user_id,
            provider,
            provider_user_id: None,
            access_token: "token".to_owned(),
            refresh_token: "refresh".to_owned(),
            token_expires_at: now + 10 * 60 * 60 * 1_000,
            scopes: None,
            status: ConnectionStatus::Active,
            connected_at: 0,
            last_refreshed_at: None,
        }
    }

    struct Fixture {
        deps: SchedulerDeps,
        subscriptions: Arc<InMemorySubscriptionStore>,
        connections: Arc<InMemoryConnectionStore>,
    }

    fn build_deps(clock: Arc<ManualClock>) -> Fixture {
        let subscriptions = Arc::new(InMemorySubscriptionStore::new());
        let connections = Arc::new(InMemoryConnectionStore::new());
        let notifications = Arc::new(InMemoryNotificationStore::new());
        let kv: Arc<dyn Kv> = Arc::new(InMemoryKv::new(clock.clone()));
        let health = Arc::new(HealthMonitor::new(
            connections.clone(),
            subscriptions.clone(),
            notifications,
            kv.clone(),
            clock.clone(),
        ));
        let token_service = Arc::new(TokenService::new(connections.clone(), clock.clone()));
        let rate_limiter: Arc<dyn RateLimiter> =
            Arc::new(TokenBucketRateLimiter::new(clock.clone(), 100.0, 100.0));

        let mut pollers: HashMap<Provider, Arc<dyn Poller>> = HashMap::new();
        pollers.insert(
            Provider::Youtube,
            Arc::new(StubPoller {
                outcome: PollOutcome {
                    new_items: 1,
                    disconnected: false,
                },
            }),
        );

        let ingestion = IngestionDeps {
            seen: Arc::new(InMemorySeenStore::new()),
            items: Arc::new(InMemoryItemStore::new()),
            creators: Arc::new(InMemoryCreatorStore::new()),
            user_items: Arc::new(InMemoryUserItemStore::new()),
            subscription_items: Arc::new(InMemorySubscriptionItemStore::new()),
            dlq: Arc::new(InMemoryDlqStore::new()),
            clock: clock.clone(),
        };

        let deps = SchedulerDeps {
            subscriptions: subscriptions.clone(),
            rate_limiter,
            token_service,
            health,
            pollers,
            kv,
            ingestion,
            clock,
        };
        Fixture {
            deps,
            subscriptions,
            connections,
        }
    }

    #[tokio::test]
    async fn run_processes_due_subscription_and_advances_watermark() {
        let clock = Arc::new(ManualClock::new(10_000_000));
        let fixture = build_deps(clock.clone());
        let user_id = UserId::new();

        fixture
            .connections
            .upsert(connection(user_id, Provider::Youtube, 10_000_000))
            .await
            .unwrap();

        let sub = sub(user_id, Provider::Youtube);
        let sub_id = sub.id;
        fixture.subscriptions.upsert(sub).await.unwrap();

        let scheduler = Scheduler::new(fixture.deps);
        let result = scheduler.run().await.unwrap();
        assert_eq!(result.processed, 1);
        assert_eq!(result.new_items, 1);

        let updated = fixture.subscriptions.get(sub_id).await.unwrap().unwrap();
        assert_eq!(updated.last_polled_at, Some(10_000_000));
    }

    #[tokio::test]
    async fn overlapping_runs_serialize_via_the_lock() {
        let clock = Arc::new(ManualClock::new(0));
        let fixture = build_deps(clock);
        let kv = fixture.deps.kv.clone();
        assert!(kv.try_lock(CRON_LOCK_KEY, CRON_LOCK_TTL_MILLIS).await.unwrap());

        let scheduler = Scheduler::new(fixture.deps);
        let result = scheduler.run().await.unwrap();
        assert_eq!(result.skipped.as_deref(), Some("lock_held"));
    }

    #[tokio::test]
    async fn subscription_without_a_poller_is_left_untouched() {
        let clock = Arc::new(ManualClock::new(5_000));
        let fixture = build_deps(clock);
        let user_id = UserId::new();
        fixture
            .connections
            .upsert(connection(user_id, Provider::Spotify, 5_000))
            .await
            .unwrap();
        let sub = sub(user_id, Provider::Spotify);
        let sub_id = sub.id;
        fixture.subscriptions.upsert(sub).await.unwrap();

        let scheduler = Scheduler::new(fixture.deps);
        let result = scheduler.run().await.unwrap();
        assert_eq!(result.processed, 0);

        let untouched = fixture.subscriptions.get(sub_id).await.unwrap().unwrap();
        assert_eq!(untouched.last_polled_at, None);
    }
}
