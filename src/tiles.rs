use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::Config;
use crate::constants::{COVERAGE_LABEL, PRIMARY_SOURCE_LABEL, SECONDARY_SOURCE_LABEL};
use crate::error::{HandlerFault, ResolveError};
use crate::types::{Resolution, TileBounds};
use crate::utils::iso_millis;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RadarTilePayload {
    pub success: bool,
    pub timestamp: String,
    pub tile_url: String,
    pub source: String,
    pub coverage: String,
    pub bounds: TileBounds,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stale: Option<bool>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RadarErrorPayload {
    pub success: bool,
    pub error: String,
    pub message: String,
}

impl RadarErrorPayload {
    pub fn new(error: &str, message: impl ToString) -> Self {
        Self {
            success: false,
            error: error.to_string(),
            message: message.to_string(),
        }
    }
}

/// Body of `GET /api/radar-data`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RadarDataResponse {
    Ready(RadarTilePayload),
    Failed(RadarErrorPayload),
}

/// Maps a resolution outcome onto the tile payload served to clients.
///
/// Tiles always come from the secondary mosaic; only the labels differ. A
/// failed resolution degrades to the secondary source stamped with `now`.
pub fn translate(
    outcome: Result<Resolution, ResolveError>,
    cfg: &Config,
    now: DateTime<Utc>,
) -> Result<RadarTilePayload, HandlerFault> {
    let tile_url = validated_template(&cfg.fallback_tile_url)?;

    let (timestamp, source, stale) = match outcome {
        Ok(resolution) => (
            resolution.reference.timestamp,
            PRIMARY_SOURCE_LABEL,
            resolution.stale.then_some(true),
        ),
        Err(error) => {
            warn!("MRMS resolution failed, serving secondary radar tiles: {error}");
            (now, SECONDARY_SOURCE_LABEL, None)
        }
    };

    Ok(RadarTilePayload {
        success: true,
        timestamp: iso_millis(timestamp),
        tile_url,
        source: source.to_string(),
        coverage: COVERAGE_LABEL.to_string(),
        bounds: cfg.coverage_bounds,
        stale,
    })
}

/// Returns the template if it carries all of `{z}`, `{x}` and `{y}`.
pub fn validated_template(template: &str) -> Result<String, HandlerFault> {
    let complete = ["{z}", "{x}", "{y}"]
        .iter()
        .all(|placeholder| template.contains(placeholder));
    if !complete {
        return Err(HandlerFault::InvalidTileTemplate(template.to_string()));
    }
    Ok(template.to_string())
}
