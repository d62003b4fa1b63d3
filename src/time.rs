//! Monotonic millisecond clock and lexicographically-sortable IDs.
//!
//! New rows use an integer Unix-millisecond [`Timestamp`] everywhere in the
//! core domain model. The only place that should ever touch an ISO-8601
//! string is a DB adapter converting one of the enumerated legacy columns at
//! the persistence boundary — [`millis_to_iso8601`] and [`iso8601_to_millis`]
//! exist for exactly that, and nowhere else.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{Error, Result};

/// Unix milliseconds. All new timestamps in the core domain model are this type.
pub type Timestamp = i64;

/// Source of the current time, injected everywhere the core needs "now" so
/// tests can drive it deterministically instead of reading the wall clock.
pub trait Clock: Send + Sync + 'static {
    fn now_millis(&self) -> Timestamp;
}

/// Real wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> Timestamp {
        Utc::now().timestamp_millis()
    }
}

/// A clock that returns a fixed or manually-advanced value. Used throughout
/// the test suite so scenarios like "first poll" (`lastPolledAt == 0`) and
/// watermark math are exact rather than racing the wall clock.
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    #[must_use]
    pub fn new(start: Timestamp) -> Self {
        Self {
            millis: AtomicI64::new(start),
        }
    }

    pub fn set(&self, value: Timestamp) {
        self.millis.store(value, Ordering::SeqCst);
    }

    pub fn advance(&self, delta: Timestamp) -> Timestamp {
        self.millis.fetch_add(delta, Ordering::SeqCst) + delta
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> Timestamp {
        self.millis.load(Ordering::SeqCst)
    }
}

/// Generates a lexicographically-sortable, time-ordered identifier.
///
/// `Uuid::now_v7` packs a 48-bit millisecond timestamp into the high bits,
/// so IDs generated later sort later both as UUIDs and as their canonical
/// string form — the property the "Timestamps & ID" component needs for
/// cursor pagination (`list`'s cursor is simply the last row's id).
#[must_use]
pub fn new_sortable_id() -> Uuid {
    Uuid::now_v7()
}

/// Converts a millisecond timestamp to the RFC3339/ISO-8601 string some
/// legacy columns store. DB-adapter use only.
pub fn millis_to_iso8601(millis: Timestamp) -> Result<String> {
    let dt = DateTime::<Utc>::from_timestamp_millis(millis)
        .ok_or_else(|| Error::validation(format!("timestamp out of range: {millis}")))?;
    Ok(dt.to_rfc3339())
}

/// Converts a legacy ISO-8601 string to milliseconds. DB-adapter use only.
pub fn iso8601_to_millis(value: &str) -> Result<Timestamp> {
    let dt = DateTime::parse_from_rfc3339(value)
        .map_err(|e| Error::with_source(crate::error::Kind::Internal, e))?;
    Ok(dt.with_timezone(&Utc).timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances_monotonically() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.now_millis(), 1_000);
        assert_eq!(clock.advance(500), 1_500);
        assert_eq!(clock.now_millis(), 1_500);
    }

    #[test]
    fn sortable_ids_increase_with_time() {
        let a = new_sortable_id();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = new_sortable_id();
        assert!(a.as_bytes()[..6] <= b.as_bytes()[..6]);
    }

    #[test]
    fn iso8601_round_trips_through_millis() {
        let millis = 1_700_000_000_000;
        let iso = millis_to_iso8601(millis).expect("valid timestamp");
        let back = iso8601_to_millis(&iso).expect("valid iso string");
        assert_eq!(back, millis);
    }
}
