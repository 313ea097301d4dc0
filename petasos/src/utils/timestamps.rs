//! Timestamp helpers shared by the parcel model and the sweep.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Represents a timestamp that can be serialized/deserialized.
pub type Timestamp = DateTime<Utc>;

/// Returns the current UTC timestamp.
#[must_use]
pub fn now_utc() -> Timestamp {
    Utc::now()
}

/// Returns the current UTC time as an ISO 8601 formatted string.
///
/// # Examples
///
/// ```
/// use petasos::utils::iso_timestamp;
///
/// let ts = iso_timestamp();
/// assert!(ts.contains('T'));
/// assert!(ts.ends_with("+00:00"));
/// ```
#[must_use]
pub fn iso_timestamp() -> String {
    format_iso8601(&Utc::now())
}

/// Formats a timestamp as ISO 8601 string.
#[must_use]
pub fn format_iso8601(dt: &Timestamp) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.6f+00:00").to_string()
}

/// Returns how long ago `then` was, relative to `now`.
///
/// Timestamps in the future of `now` yield a zero age.
#[must_use]
pub fn age_of(then: &Timestamp, now: &Timestamp) -> Duration {
    (*now - *then).to_std().unwrap_or(Duration::ZERO)
}

/// Returns true if `then` is strictly older than `max_age` at `now`.
#[must_use]
pub fn is_older_than(then: &Timestamp, now: &Timestamp, max_age: Duration) -> bool {
    age_of(then, now) > max_age
}
