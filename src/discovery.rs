use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use regex::Regex;

use crate::constants::{
    MAX_PROBE_WINDOW_SECONDS, MRMS_FILE_SUFFIX, MRMS_LEVEL_TAG, MRMS_PRODUCT_PREFIX,
};
use crate::utils::{floor_timestamp, format_timestamp_compact};

pub fn listing_regex() -> Result<Regex> {
    let pattern = format!(
        r"{}_{}_(\d{{8}}-\d{{6}}){}",
        regex::escape(MRMS_PRODUCT_PREFIX),
        regex::escape(MRMS_LEVEL_TAG),
        regex::escape(MRMS_FILE_SUFFIX)
    );
    Regex::new(&pattern).context("Failed to compile MRMS listing regex")
}

/// Greatest `yyyymmdd-hhmmss` stamp named in a directory listing.
///
/// The stamps are fixed-width and zero padded, so string order is time order.
pub fn latest_timestamp_in_listing(body: &str, regex: &Regex) -> Option<String> {
    regex
        .captures_iter(body)
        .filter_map(|captures| captures.get(1).map(|value| value.as_str()))
        .max()
        .map(str::to_string)
}

pub fn build_file_name(timestamp: &str) -> String {
    format!("{MRMS_PRODUCT_PREFIX}_{MRMS_LEVEL_TAG}_{timestamp}{MRMS_FILE_SUFFIX}")
}

pub fn build_file_url(base_url: &str, timestamp: &str) -> String {
    format!("{base_url}{}", build_file_name(timestamp))
}

/// Candidate publish times, newest first: `now` floored to `step`, then one step
/// older at a time until `window` has been covered (inclusive). The window is
/// capped at [`MAX_PROBE_WINDOW_SECONDS`].
pub fn probe_candidates(now: DateTime<Utc>, step: Duration, window: Duration) -> Vec<String> {
    let window_seconds = window.as_secs().min(MAX_PROBE_WINDOW_SECONDS) as i64;
    let step_seconds = step.as_secs().clamp(1, MAX_PROBE_WINDOW_SECONDS + 1) as i64;
    let steps = window_seconds / step_seconds;

    (0..=steps)
        .map(|index| {
            let candidate = now - chrono::Duration::seconds(index * step_seconds);
            format_timestamp_compact(floor_timestamp(candidate, step_seconds))
        })
        .collect()
}
