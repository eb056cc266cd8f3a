//! Column encodings shared by the repositories.

use chrono::{DateTime, SecondsFormat};

use growdash_domain::time::Timestamp;

use crate::error::StorageError;

/// Fixed-width RFC 3339 with nanoseconds, so text order is time order and
/// the value survives a round trip unchanged.
pub(crate) fn encode_ts(ts: Timestamp) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn decode_ts(value: &str) -> Result<Timestamp, StorageError> {
    Ok(DateTime::parse_from_rfc3339(value)?.to_utc())
}

pub(crate) fn decode_opt_ts(value: Option<String>) -> Result<Option<Timestamp>, StorageError> {
    value.as_deref().map(decode_ts).transpose()
}
