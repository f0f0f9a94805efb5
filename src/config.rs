use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::constants::{
    CONUS_EAST_DEG, CONUS_NORTH_DEG, CONUS_SOUTH_DEG, CONUS_WEST_DEG, DEFAULT_LISTEN_ADDR,
    DEFAULT_PROBE_STEP_SECONDS, DEFAULT_PROBE_WINDOW_SECONDS, DEFAULT_REFRESH_INTERVAL_SECONDS,
    DEFAULT_REQUEST_TIMEOUT_SECONDS, MAX_PROBE_WINDOW_SECONDS, MRMS_BASE_URL, SECONDARY_TILE_URL,
};
use crate::tiles::validated_template;
use crate::types::TileBounds;

#[derive(Clone, Debug)]
pub struct Config {
    pub listen_addr: String,
    pub mrms_base_url: String,
    pub refresh_interval: Duration,
    pub request_timeout: Duration,
    pub probe_step: Duration,
    pub probe_window: Duration,
    pub fallback_tile_url: String,
    pub coverage_bounds: TileBounds,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            mrms_base_url: MRMS_BASE_URL.to_string(),
            refresh_interval: Duration::from_secs(DEFAULT_REFRESH_INTERVAL_SECONDS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECONDS),
            probe_step: Duration::from_secs(DEFAULT_PROBE_STEP_SECONDS),
            probe_window: Duration::from_secs(DEFAULT_PROBE_WINDOW_SECONDS),
            fallback_tile_url: SECONDARY_TILE_URL.to_string(),
            coverage_bounds: TileBounds {
                north: CONUS_NORTH_DEG,
                south: CONUS_SOUTH_DEG,
                east: CONUS_EAST_DEG,
                west: CONUS_WEST_DEG,
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let listen_addr = env_string("RADAR_LISTEN_ADDR", DEFAULT_LISTEN_ADDR);
        let mrms_base_url = directory_url(&env_string("RADAR_MRMS_BASE_URL", MRMS_BASE_URL));
        let refresh_interval = Duration::from_secs(env_u64(
            "RADAR_REFRESH_INTERVAL_SECONDS",
            DEFAULT_REFRESH_INTERVAL_SECONDS,
        )?);
        let request_timeout = Duration::from_secs(env_u64(
            "RADAR_REQUEST_TIMEOUT_SECONDS",
            DEFAULT_REQUEST_TIMEOUT_SECONDS,
        )?);
        let probe_step = Duration::from_secs(
            env_u64("RADAR_PROBE_STEP_SECONDS", DEFAULT_PROBE_STEP_SECONDS)?.max(1),
        );
        let probe_window = Duration::from_secs(env_u64(
            "RADAR_PROBE_WINDOW_SECONDS",
            DEFAULT_PROBE_WINDOW_SECONDS,
        )?);
        let fallback_tile_url = env_string("RADAR_FALLBACK_TILE_URL", SECONDARY_TILE_URL);
        let coverage_bounds = match env_optional("RADAR_COVERAGE_BOUNDS") {
            Some(value) => parse_bounds(&value)
                .with_context(|| format!("Failed to parse RADAR_COVERAGE_BOUNDS={value}"))?,
            None => defaults.coverage_bounds,
        };

        let cfg = Self {
            listen_addr,
            mrms_base_url,
            refresh_interval,
            request_timeout,
            probe_step,
            probe_window,
            fallback_tile_url,
            coverage_bounds,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Rejects settings that would only fail later, per request.
    pub fn validate(&self) -> Result<()> {
        if self.probe_window.as_secs() > MAX_PROBE_WINDOW_SECONDS {
            bail!(
                "RADAR_PROBE_WINDOW_SECONDS={} exceeds the maximum of {MAX_PROBE_WINDOW_SECONDS}",
                self.probe_window.as_secs()
            );
        }
        validated_template(&self.fallback_tile_url).context("Invalid RADAR_FALLBACK_TILE_URL")?;
        Ok(())
    }
}

/// Listing and file URLs are built by plain concatenation, so the base must end in `/`.
fn directory_url(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    }
}

fn parse_bounds(value: &str) -> Result<TileBounds> {
    let parts = value
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<f64>()
                .with_context(|| format!("Invalid coordinate {part:?}"))
        })
        .collect::<Result<Vec<_>>>()?;

    let [north, south, east, west] = parts.as_slice() else {
        bail!("Expected four values (north,south,east,west), got {}", parts.len());
    };
    if north <= south {
        bail!("North edge {north} must be greater than south edge {south}");
    }

    Ok(TileBounds {
        north: *north,
        south: *south,
        east: *east,
        west: *west,
    })
}

pub fn env_optional(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn env_string(name: &str, default: &str) -> String {
    env_optional(name).unwrap_or_else(|| default.to_string())
}

pub fn env_u64(name: &str, default: u64) -> Result<u64> {
    match env_optional(name) {
        Some(value) => value
            .parse::<u64>()
            .with_context(|| format!("Failed to parse {}={} as u64", name, value)),
        None => Ok(default),
    }
}
