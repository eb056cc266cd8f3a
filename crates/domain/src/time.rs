//! Time and timestamp helpers.

use chrono::{DateTime, TimeDelta, Utc};

/// UTC timestamp used for event anchors, occurrences and command bookkeeping.
pub type Timestamp = DateTime<Utc>;

/// Return the current UTC time.
///
/// Only the composition root should call this; every use-case takes `now`
/// as an argument.
#[must_use]
pub fn now() -> Timestamp {
    Utc::now()
}

/// Build a [`TimeDelta`] from whole minutes, saturating on overflow.
#[must_use]
pub fn minutes(value: u64) -> TimeDelta {
    i64::try_from(value)
        .ok()
        .and_then(TimeDelta::try_minutes)
        .unwrap_or(TimeDelta::MAX)
}

/// Express a [`TimeDelta`] as whole minutes (rounded down, never negative).
#[must_use]
pub fn whole_minutes(delta: TimeDelta) -> u64 {
    u64::try_from(delta.num_minutes()).unwrap_or(0)
}
