use std::cmp::max;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};

use crate::constants::MRMS_TIMESTAMP_FORMAT;

pub fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .without_time()
        .init();
}

pub fn parse_timestamp_utc(timestamp: &str) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(timestamp, MRMS_TIMESTAMP_FORMAT).ok()?;
    Some(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
}

pub fn format_timestamp_compact(timestamp: DateTime<Utc>) -> String {
    timestamp.format(MRMS_TIMESTAMP_FORMAT).to_string()
}

/// ISO-8601 with millisecond precision and a `Z` suffix, e.g. `2024-06-15T12:00:00.000Z`.
pub fn iso_millis(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn floor_timestamp(timestamp: DateTime<Utc>, step_seconds: i64) -> DateTime<Utc> {
    let step_ms = max(step_seconds, 1) * 1000;
    let floored_ms = timestamp.timestamp_millis().div_euclid(step_ms) * step_ms;
    DateTime::<Utc>::from_timestamp_millis(floored_ms).unwrap_or(timestamp)
}
