//! Recurrence: turning an event's anchor time and optional `RRULE` into
//! concrete fire times.
//!
//! Supported rule parts: `FREQ`, `INTERVAL`, `COUNT`, `UNTIL`, `BYMONTH`,
//! `BYMONTHDAY`, `BYDAY` (ordinals with `MONTHLY`/`YEARLY`), `BYHOUR`,
//! `BYMINUTE`, `BYSECOND` and `WKST`. All evaluation happens in UTC.

mod expand;
mod rule;

pub use expand::{Occurrences, expand};
pub use rule::{ByDay, Frequency, RecurrenceRule, RuleParseError};

use serde::{Deserialize, Serialize};

use crate::id::EventId;
use crate::time::Timestamp;

/// One concrete firing of an event. Never persisted; recomputed every run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Occurrence {
    pub event_id: EventId,
    pub fire_time: Timestamp,
}

/// Parse `rule` (when present) and expand it.
///
/// # Errors
///
/// Returns [`RuleParseError`] when `rule` is not a valid `RRULE`.
pub fn expand_str(
    anchor: Timestamp,
    rule: Option<&str>,
    window_start: Timestamp,
    window_end: Timestamp,
) -> Result<Occurrences, RuleParseError> {
    let parsed = rule.map(str::parse::<RecurrenceRule>).transpose()?;
    Ok(expand(anchor, parsed.as_ref(), window_start, window_end))
}
