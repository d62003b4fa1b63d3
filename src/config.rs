//! Tunable knobs for the scheduler, token service, and health monitor.
//!
//! Shaped after the teacher's reconnection config: named `DEFAULT_*`
//! constants backing a `Default` impl, plus an `from_env` constructor for
//! the handful of values operators actually need to override in production.

use std::time::Duration;

use crate::{Error, Result};

/// Default cron cadence floor; no subscription is polled more often than this.
pub const DEFAULT_MIN_POLL_INTERVAL: Duration = Duration::from_secs(15 * 60);
/// Default cron cadence ceiling; no subscription goes longer without a poll.
pub const DEFAULT_MAX_POLL_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);
/// Starting interval assigned to a brand-new subscription.
pub const DEFAULT_INITIAL_POLL_INTERVAL: Duration = Duration::from_secs(60 * 60);
/// How many consecutive poll failures before the health monitor warns the user.
pub const DEFAULT_POLL_FAILURE_THRESHOLD: u32 = 5;
/// Base of the token-refresh exponential backoff.
pub const DEFAULT_TOKEN_REFRESH_BACKOFF_BASE: Duration = Duration::from_secs(60);
/// Ceiling of the token-refresh exponential backoff.
pub const DEFAULT_TOKEN_REFRESH_BACKOFF_MAX: Duration = Duration::from_secs(240 * 60);
/// TTL of the cron distributed lock, long enough to cover one full tick.
pub const DEFAULT_CRON_LOCK_TTL: Duration = Duration::from_secs(10 * 60);
/// Minimum spacing between two manual `syncNow` calls for the same subscription.
pub const DEFAULT_MANUAL_SYNC_COOLDOWN: Duration = Duration::from_secs(5 * 60);
/// Minimum spacing between two `syncAll` calls for the same user.
pub const DEFAULT_SYNC_ALL_COOLDOWN: Duration = Duration::from_secs(2 * 60);
/// Per-run wall-clock budget before in-flight provider calls are abandoned.
pub const DEFAULT_RUN_DEADLINE: Duration = Duration::from_secs(8 * 60);
/// How many subscriptions a poller processes concurrently.
pub const DEFAULT_POLL_CONCURRENCY: usize = 8;
/// Trigger threshold (in units of current interval) for interval re-evaluation.
pub const DEFAULT_INTERVAL_ADJUSTMENT_TRIGGER: u32 = 24;

#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct Config {
    pub min_poll_interval: Duration,
    pub max_poll_interval: Duration,
    pub initial_poll_interval: Duration,
    pub poll_failure_threshold: u32,
    pub token_refresh_backoff_base: Duration,
    pub token_refresh_backoff_max: Duration,
    pub cron_lock_ttl: Duration,
    pub manual_sync_cooldown: Duration,
    pub sync_all_cooldown: Duration,
    pub run_deadline: Duration,
    pub poll_concurrency: usize,
    pub interval_adjustment_trigger: u32,
    pub youtube_api_key: Option<String>,
    pub spotify_client_id: Option<String>,
    pub spotify_client_secret: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            min_poll_interval: DEFAULT_MIN_POLL_INTERVAL,
            max_poll_interval: DEFAULT_MAX_POLL_INTERVAL,
            initial_poll_interval: DEFAULT_INITIAL_POLL_INTERVAL,
            poll_failure_threshold: DEFAULT_POLL_FAILURE_THRESHOLD,
            token_refresh_backoff_base: DEFAULT_TOKEN_REFRESH_BACKOFF_BASE,
            token_refresh_backoff_max: DEFAULT_TOKEN_REFRESH_BACKOFF_MAX,
            cron_lock_ttl: DEFAULT_CRON_LOCK_TTL,
            manual_sync_cooldown: DEFAULT_MANUAL_SYNC_COOLDOWN,
            sync_all_cooldown: DEFAULT_SYNC_ALL_COOLDOWN,
            run_deadline: DEFAULT_RUN_DEADLINE,
            poll_concurrency: DEFAULT_POLL_CONCURRENCY,
            interval_adjustment_trigger: DEFAULT_INTERVAL_ADJUSTMENT_TRIGGER,
            youtube_api_key: None,
            spotify_client_id: None,
            spotify_client_secret: None,
        }
    }
}

impl Config {
    /// Builds a [`Config`] from the recognized environment variables,
    /// falling back to the `DEFAULT_*` constants for anything unset.
    ///
    /// # Errors
    /// Returns a validation error if a numeric env var is present but not a
    /// valid number.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(value) = env_u64("ZINE_SYNC_MIN_POLL_INTERVAL_SECS")? {
            config.min_poll_interval = Duration::from_secs(value);
        }
        if let Some(value) = env_u64("ZINE_SYNC_MAX_POLL_INTERVAL_SECS")? {
            config.max_poll_interval = Duration::from_secs(value);
        }
        if let Some(value) = env_u32("ZINE_SYNC_POLL_FAILURE_THRESHOLD")? {
            config.poll_failure_threshold = value;
        }
        if let Some(value) = env_usize("ZINE_SYNC_POLL_CONCURRENCY")? {
            config.poll_concurrency = value;
        }
        config.youtube_api_key = std::env::var("YOUTUBE_API_KEY").ok();
        config.spotify_client_id = std::env::var("SPOTIFY_CLIENT_ID").ok();
        config.spotify_client_secret = std::env::var("SPOTIFY_CLIENT_SECRET").ok();
        Ok(config)
    }
}

fn env_u64(key: &str) -> Result<Option<u64>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<u64>()
            .map(Some)
            .map_err(|e| Error::validation(format!("{key} must be a positive integer: {e}"))),
        Err(_) => Ok(None),
    }
}

fn env_u32(key: &str) -> Result<Option<u32>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<u32>()
            .map(Some)
            .map_err(|e| Error::validation(format!("{key} must be a positive integer: {e}"))),
        Err(_) => Ok(None),
    }
}

fn env_usize(key: &str) -> Result<Option<usize>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<usize>()
            .map(Some)
            .map_err(|e| Error::validation(format!("{key} must be a positive integer: {e}"))),
        Err(_) => Ok(None),
    }
}
