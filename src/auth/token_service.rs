//! `getValidToken` with single-flight refresh and exponential backoff.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use dashmap::DashMap;
use tokio::sync::Mutex as AsyncMutex;

use crate::error::{NoConnection, RateLimited};
use crate::store::ConnectionStore;
use crate::time::{Clock, Timestamp};
use crate::types::{ConnectionStatus, Provider, UserId};
use crate::{Error, Result};

/// Buffer before expiry within which the stored token is still handed out
/// without a refresh attempt.
const DEFAULT_REFRESH_BUFFER: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone)]
pub struct RefreshedTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in_secs: i64,
}

/// Per-provider refresh implementation. Implementors classify failures
/// using the marker errors in [`crate::error`] (`RefreshInvalid`,
/// `AccessRevoked`) so the token service and health monitor can branch
/// without parsing provider-specific error bodies again.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedTokens>;
}

struct BackoffState {
    backoff: backoff::ExponentialBackoff,
    next_allowed_at: Timestamp,
}

pub struct TokenService {
    connections: Arc<dyn ConnectionStore>,
    refreshers: DashMap<Provider, Arc<dyn TokenRefresher>>,
    clock: Arc<dyn Clock>,
    refresh_buffer_millis: i64,
    locks: DashMap<(UserId, Provider), Arc<AsyncMutex<()>>>,
    backoff_state: DashMap<(UserId, Provider), BackoffState>,
    backoff_base: Duration,
    backoff_max: Duration,
}

impl TokenService {
    #[must_use]
    pub fn new(connections: Arc<dyn ConnectionStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            connections,
            refreshers: DashMap::new(),
            clock,
            refresh_buffer_millis: i64::try_from(DEFAULT_REFRESH_BUFFER.as_millis()).unwrap_or(i64::MAX),
            locks: DashMap::new(),
            backoff_state: DashMap::new(),
            backoff_base: crate::config::DEFAULT_TOKEN_REFRESH_BACKOFF_BASE,
            backoff_max: crate::config::DEFAULT_TOKEN_REFRESH_BACKOFF_MAX,
        }
    }

    #[must_use]
    pub fn with_refresh_buffer(mut self, buffer: Duration) -> Self {
        self.refresh_buffer_millis = i64::try_from(buffer.as_millis()).unwrap_or(i64::MAX);
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_max = max;
        self
    }

    pub fn register_refresher(&self, provider: Provider, refresher: Arc<dyn TokenRefresher>) {
        self.refreshers.insert(provider, refresher);
    }

    fn new_backoff(&self) -> backoff::ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.backoff_base)
            .with_multiplier(2.0)
            .with_randomization_factor(0.0)
            .with_max_interval(self.backoff_max)
            .with_max_elapsed_time(None)
            .build()
    }

    /// Returns a usable access token for `(user_id, provider)`, refreshing
    /// it if it's within the expiry buffer. At most one outbound refresh
    /// runs per key at a time; concurrent callers await the same result.
    ///
    /// # Errors
    /// [`crate::error::NoConnection`] if no active connection exists;
    /// [`crate::error::RateLimited`] while a prior refresh failure's
    /// backoff window is still open; otherwise whatever the refresher
    /// returns, classified per the crate's error taxonomy.
    pub async fn get_valid_token(&self, user_id: UserId, provider: Provider) -> Result<String> {
        let connection = self
            .connections
            .get(user_id, provider)
            .await?
            .filter(|c| c.status == ConnectionStatus::Active)
            .ok_or(NoConnection)?;

        let now = self.clock.now_millis();
        if connection.token_expires_at - now > self.refresh_buffer_millis {
            return Ok(connection.access_token);
        }

        let key = (user_id, provider);
        let lock = self
            .locks
            .entry(key)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Re-read: another caller may have refreshed while we waited on the lock.
        let connection = self
            .connections
            .get(user_id, provider)
            .await?
            .filter(|c| c.status == ConnectionStatus::Active)
            .ok_or(NoConnection)?;
        let now = self.clock.now_millis();
        if connection.token_expires_at - now > self.refresh_buffer_millis {
            return Ok(connection.access_token);
        }

        if let Some(state) = self.backoff_state.get(&key) {
            if state.next_allowed_at > now {
                return Err(RateLimited {
                    resource: format!("token-refresh:{user_id}:{provider}"),
                }
                .into());
            }
        }

        let refresher = self
            .refreshers
            .get(&provider)
            .map(|r| r.clone())
            .ok_or_else(|| Error::validation(format!("no token refresher registered for {provider}")))?;

        match refresher.refresh(&connection.refresh_token).await {
            Ok(tokens) => {
                self.backoff_state.remove(&key);
                let updated = self
                    .connections
                    .update_tokens(
                        user_id,
                        provider,
                        tokens.access_token.clone(),
                        tokens.refresh_token,
                        now + tokens.expires_in_secs * 1_000,
                        now,
                    )
                    .await?;
                Ok(updated.access_token)
            }
            Err(err) => {
                let mut state = self
                    .backoff_state
                    .entry(key)
                    .or_insert_with(|| BackoffState {
                        backoff: self.new_backoff(),
                        next_allowed_at: now,
                    });
                let delay = state.backoff.next_backoff().unwrap_or(self.backoff_max);
                state.next_allowed_at = now + i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
                Err(err)
            }
        }
    }
}
