//! Adaptive polling interval: a pure function of recent activity, with a
//! separately-gated trigger for when to re-evaluate it.

use crate::domain::Subscription;
use crate::time::Timestamp;

/// How many most-recent `SubscriptionItem` rows the activity scan considers.
pub const ACTIVITY_SCAN_LIMIT: usize = 100;
/// `K` in the `K · currentInterval` adjustment-trigger rule.
pub const ADJUSTMENT_TRIGGER_K: u64 = 24;
/// An interval change below this relative magnitude is treated as churn
/// and suppressed.
const CHURN_GUARD_RATIO: f64 = 0.5;

#[derive(Debug, Clone, Copy, Default)]
pub struct ActivityMetrics {
    pub items_last_7_days: u32,
    pub items_last_30_days: u32,
}

/// Maps recent activity to a poll interval in seconds, per the four-tier table.
#[must_use]
pub fn next_interval(metrics: ActivityMetrics) -> u64 {
    if metrics.items_last_7_days >= 7 {
        3_600
    } else if metrics.items_last_7_days >= 1 {
        14_400
    } else if metrics.items_last_30_days >= 1 {
        43_200
    } else {
        86_400
    }
}

/// Computes [`ActivityMetrics`] from recent `SubscriptionItem.published_at`
/// values (already capped at [`ACTIVITY_SCAN_LIMIT`] by the caller's store
/// query), relative to `now`.
#[must_use]
pub fn activity_metrics(recent_published_at: &[Timestamp], now: Timestamp) -> ActivityMetrics {
    const DAY_MILLIS: i64 = 86_400 * 1_000;
    let mut metrics = ActivityMetrics::default();
    for published_at in recent_published_at {
        let age_days = (now - published_at) / DAY_MILLIS;
        if age_days < 7 {
            metrics.items_last_7_days += 1;
        }
        if age_days < 30 {
            metrics.items_last_30_days += 1;
        }
    }
    metrics
}

/// Returns `Some(new_interval_seconds)` if `sub` is due for interval
/// re-evaluation (every `K · currentInterval` since `created_at`, K=24) and
/// the candidate differs from the current interval by at least 50%;
/// `None` otherwise (not due, or the change would be churn).
#[must_use]
pub fn should_adjust(
    sub: &Subscription,
    now: Timestamp,
    metrics: ActivityMetrics,
) -> Option<u64> {
    let current = sub.poll_interval_seconds.max(1);
    let elapsed_secs = (now - sub.created_at).max(0) / 1_000;
    let trigger_secs = current.saturating_mul(ADJUSTMENT_TRIGGER_K);
    if trigger_secs == 0 || elapsed_secs / i64::try_from(trigger_secs).unwrap_or(i64::MAX) < 1 {
        return None;
    }
    // Non-zero, divisible by the trigger window: only fire on the tick that
    // actually lands on a multiple, not every tick after the first.
    if elapsed_secs % i64::try_from(trigger_secs).unwrap_or(i64::MAX) != 0 {
        return None;
    }

    let candidate = next_interval(metrics);
    #[allow(clippy::float_arithmetic, reason = "churn-guard ratio is inherently fractional")]
    let relative_change = (candidate as f64 - current as f64).abs() / current as f64;
    if relative_change >= CHURN_GUARD_RATIO {
        Some(candidate)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Provider, SubscriptionId, SubscriptionStatus, UserId};

    fn sub(created_at: Timestamp, interval: u64) -> Subscription {
        Subscription {
            id: SubscriptionId::new(),
            user_id: UserId::new(),
            provider: Provider::Youtube,
            provider_channel_id: "UCabc".to_owned(),
            creator_id: None,
            total_items: None,
            last_published_at: None,
            last_polled_at: None,
            poll_interval_seconds: interval,
            status: SubscriptionStatus::Active,
            disconnected_at: None,
            disconnected_reason: None,
            created_at,
            updated_at: created_at,
        }
    }

    #[test]
    fn very_active_tier_is_one_hour() {
        let metrics = ActivityMetrics {
            items_last_7_days: 10,
            items_last_30_days: 10,
        };
        assert_eq!(next_interval(metrics), 3_600);
    }

    #[test]
    fn inactive_tier_is_one_day() {
        let metrics = ActivityMetrics::default();
        assert_eq!(next_interval(metrics), 86_400);
    }

    #[test]
    fn activity_metrics_counts_within_windows() {
        let now = 100 * 86_400 * 1_000;
        let recent = vec![
            now - 2 * 86_400 * 1_000,  // within 7 and 30
            now - 20 * 86_400 * 1_000, // within 30 only
            now - 60 * 86_400 * 1_000, // outside both
        ];
        let metrics = activity_metrics(&recent, now);
        assert_eq!(metrics.items_last_7_days, 1);
        assert_eq!(metrics.items_last_30_days, 2);
    }

    #[test]
    fn no_adjustment_before_trigger_window_elapses() {
        let s = sub(0, 3_600);
        let now = 10 * 3_600 * 1_000; // 10 hours, trigger is 24*3600s
        let metrics = ActivityMetrics::default();
        assert_eq!(should_adjust(&s, now, metrics), None);
    }

    #[test]
    fn adjustment_fires_at_trigger_multiple_when_change_exceeds_churn_guard() {
        let s = sub(0, 3_600);
        let trigger_secs = 3_600 * 24;
        let now = trigger_secs * 1_000; // exactly one trigger window
        let metrics = ActivityMetrics::default(); // -> 86_400s, >=50% change from 3_600
        assert_eq!(should_adjust(&s, now, metrics), Some(86_400));
    }

    #[test]
    fn small_change_is_suppressed_as_churn() {
        let s = sub(0, 43_200);
        let trigger_secs = 43_200 * 24;
        let now = trigger_secs * 1_000;
        // items_last_30_days >= 1 keeps it at the same 43_200 tier: 0% change
        let metrics = ActivityMetrics {
            items_last_7_days: 0,
            items_last_30_days: 1,
        };
        assert_eq!(should_adjust(&s, now, metrics), None);
    }
}
