//! UUID v7 utilities for time-ordered job identifiers.

use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

/// Generate a new UUIDv7 identifier.
///
/// IDs generated later in the same process sort after earlier ones, which
/// gives the job store a stable FIFO tiebreak for equal creation times.
#[inline]
pub fn new_v7() -> Uuid {
    Uuid::now_v7()
}

/// Extract the embedded millisecond timestamp from a UUIDv7.
///
/// Returns `None` for other UUID versions.
pub fn extract_timestamp(id: &Uuid) -> Option<DateTime<Utc>> {
    if !is_v7(id) {
        return None;
    }
    let bytes = id.as_bytes();
    let ms = bytes[..6]
        .iter()
        .fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
    Utc.timestamp_millis_opt(ms as i64).single()
}

/// Check whether a UUID is version 7.
#[inline]
pub fn is_v7(id: &Uuid) -> bool {
    id.get_version_num() == 7
}
