use std::future::Future;

use reqwest::Client;

use crate::constants::RADAR_DATA_PATH;
use crate::display::RadarFeed;
use crate::error::DisplayError;
use crate::tiles::{RadarDataResponse, RadarTilePayload};

/// Reads tile payloads from a running radar-tiles server.
#[derive(Clone, Debug)]
pub struct HttpRadarFeed {
    http: Client,
    endpoint: String,
}

impl HttpRadarFeed {
    pub fn new(http: Client, server_url: &str) -> Self {
        let endpoint = format!("{}{RADAR_DATA_PATH}", server_url.trim().trim_end_matches('/'));
        Self { http, endpoint }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn fetch(&self) -> Result<RadarTilePayload, DisplayError> {
        let response = self
            .http
            .get(&self.endpoint)
            .send()
            .await
            .map_err(|error| {
                DisplayError::FetchFailed(format!("request to {} failed: {error}", self.endpoint))
            })?;
        let status = response.status();

        let body = response.json::<RadarDataResponse>().await.map_err(|error| {
            DisplayError::FetchFailed(format!(
                "invalid response ({status}) from {}: {error}",
                self.endpoint
            ))
        })?;

        match body {
            RadarDataResponse::Ready(payload) => Ok(payload),
            RadarDataResponse::Failed(failure) => Err(DisplayError::FetchFailed(format!(
                "{} ({status}): {}",
                failure.error, failure.message
            ))),
        }
    }
}

impl RadarFeed for HttpRadarFeed {
    fn fetch_latest(
        &self,
    ) -> impl Future<Output = Result<RadarTilePayload, DisplayError>> + Send {
        self.fetch()
    }
}
