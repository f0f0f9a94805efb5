use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::resolver::ResolverService;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub resolver: Arc<ResolverService>,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub lat_min: f64,
    pub lat_max: f64,
    pub lon_min: f64,
    pub lon_max: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TileBounds {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

impl From<TileBounds> for BoundingBox {
    fn from(bounds: TileBounds) -> Self {
        Self {
            lat_min: bounds.south,
            lat_max: bounds.north,
            lon_min: bounds.west,
            lon_max: bounds.east,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ResolutionStrategy {
    DirectoryListing,
    TimeWindowProbe,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DatasetReference {
    pub timestamp: DateTime<Utc>,
    pub source_file_url: String,
    pub bounding_box: BoundingBox,
    pub strategy: ResolutionStrategy,
    pub grib_edition: u8,
}

#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub reference: DatasetReference,
    pub fetched_at: DateTime<Utc>,
}

/// Outcome of [`ResolverService::resolve_with_status`].
#[derive(Clone, Debug)]
pub struct Resolution {
    pub reference: DatasetReference,
    pub stale: bool,
}
