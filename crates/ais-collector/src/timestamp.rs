//! Feed timestamp normalization
//!
//! The feed reports `time_utc` as `"YYYY-MM-DD HH:MM:SS.<fraction> +HHMM UTC"`
//! with up to nanosecond precision. The fraction is truncated to microseconds
//! before parsing.

use std::sync::LazyLock;

use chrono::{DateTime, FixedOffset, Utc};
use regex::Regex;
use thiserror::Error;

#[allow(clippy::unwrap_used)]
static FEED_TIMESTAMP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9]{4}-[0-9]{2}-[0-9]{2} [0-9]{2}:[0-9]{2}:[0-9]{2})\.([0-9]+) ([+-][0-9]{4})$")
        .unwrap()
});

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimestampError {
    #[error("Malformed timestamp: {0:?}")]
    MalformedTimestamp(String),
}

/// Parse a feed timestamp into a timezone-aware instant
pub fn parse_feed_timestamp(raw: &str) -> Result<DateTime<FixedOffset>, TimestampError> {
    let malformed = || TimestampError::MalformedTimestamp(raw.to_string());

    let trimmed = raw.strip_suffix(" UTC").ok_or_else(malformed)?;
    let caps = FEED_TIMESTAMP.captures(trimmed).ok_or_else(malformed)?;

    // ASCII digits only, so byte offsets are char boundaries
    let fraction = &caps[2];
    let micros = &fraction[..fraction.len().min(6)];
    let canonical = format!("{}.{}{}", &caps[1], micros, &caps[3]);

    DateTime::parse_from_str(&canonical, "%Y-%m-%d %H:%M:%S%.f%z").map_err(|_| malformed())
}

/// Parse a feed timestamp and convert it to UTC
pub fn normalize(raw: &str) -> Result<DateTime<Utc>, TimestampError> {
    parse_feed_timestamp(raw).map(|ts| ts.with_timezone(&Utc))
}
