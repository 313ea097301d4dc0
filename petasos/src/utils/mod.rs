//! Utility functions for identifier generation and timestamp handling.

pub mod timestamps;

pub use timestamps::{age_of, format_iso8601, is_older_than, iso_timestamp, now_utc, Timestamp};

/// Generates a new random UUID (v4) rendered as a string.
#[must_use]
pub fn generate_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}
