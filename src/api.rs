use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::constants::RADAR_DATA_PATH;
use crate::error::HandlerFault;
use crate::tiles::{translate, validated_template, RadarDataResponse, RadarErrorPayload};
use crate::types::{AppState, ResolutionStrategy};
use crate::utils::iso_millis;

#[derive(Debug, Serialize)]
pub struct MetaResponse {
    ready: bool,
    timestamp: Option<String>,
    #[serde(rename = "fetchedAt")]
    fetched_at: Option<String>,
    #[serde(rename = "ageSeconds")]
    age_seconds: Option<i64>,
    refreshing: bool,
    #[serde(rename = "sourceFileUrl")]
    source_file_url: Option<String>,
    strategy: Option<ResolutionStrategy>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route(RADAR_DATA_PATH, get(radar_data))
        .route("/api/radar-data/meta", get(meta))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

pub async fn healthz() -> &'static str {
    "ok"
}

pub async fn radar_data(State(state): State<AppState>) -> Response {
    // A broken template fails every request; skip the upstream round trips.
    if let Err(fault) = validated_template(&state.cfg.fallback_tile_url) {
        return fault_response(fault);
    }

    let outcome = state.resolver.resolve_with_status().await;
    match translate(outcome, &state.cfg, Utc::now()) {
        Ok(payload) => no_store_response(StatusCode::OK, &RadarDataResponse::Ready(payload)),
        Err(fault) => fault_response(fault),
    }
}

fn fault_response(fault: HandlerFault) -> Response {
    error!("Failed to build radar data payload: {fault}");
    no_store_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        &RadarDataResponse::Failed(RadarErrorPayload::new("Failed to fetch radar data", fault)),
    )
}

pub async fn meta(State(state): State<AppState>) -> Json<MetaResponse> {
    let snapshot = state.resolver.snapshot().await;
    let now = Utc::now();

    let Some(entry) = snapshot.entry else {
        return Json(MetaResponse {
            ready: false,
            timestamp: None,
            fetched_at: None,
            age_seconds: None,
            refreshing: snapshot.refreshing,
            source_file_url: None,
            strategy: None,
        });
    };

    Json(MetaResponse {
        ready: true,
        timestamp: Some(iso_millis(entry.reference.timestamp)),
        fetched_at: Some(iso_millis(entry.fetched_at)),
        age_seconds: Some((now - entry.fetched_at).num_seconds().max(0)),
        refreshing: snapshot.refreshing,
        source_file_url: Some(entry.reference.source_file_url),
        strategy: Some(entry.reference.strategy),
    })
}

fn no_store_response<T: Serialize>(status: StatusCode, payload: &T) -> Response {
    let mut response = (status, Json(payload)).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use reqwest::Client;
    use serde_json::Value;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::config::Config;
    use crate::constants::SECONDARY_SOURCE_LABEL;
    use crate::grib::tests::sample_grib_gz;
    use crate::resolver::ResolverService;

    fn state_for(server: &MockServer, cfg: Config) -> AppState {
        let cfg = Arc::new(Config {
            mrms_base_url: format!("{}/2D/", server.uri()),
            probe_window: Duration::from_secs(240),
            ..cfg
        });
        let http = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        let resolver = Arc::new(ResolverService::new(cfg.clone(), http).unwrap());
        AppState { cfg, resolver }
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn cold_cache_resolves_from_listing_end_to_end() {
        let server = MockServer::start().await;
        let file = "MRMS_ReflectivityAtLowestAltitude_00.50_20240615-120000.grib2.gz";
        Mock::given(method("GET"))
            .and(path("/2D/"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(format!("<a href=\"{file}\">{file}</a>")),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/2D/{file}")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(sample_grib_gz()))
            .mount(&server)
            .await;

        let state = state_for(&server, Config::default());
        let response = radar_data(State(state.clone())).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL).unwrap(),
            "no-store"
        );
        let json = body_json(response).await;
        assert_eq!(json["success"], true);
        assert_eq!(json["timestamp"], "2024-06-15T12:00:00.000Z");
        assert_eq!(json["source"], "NOAA MRMS");
        assert_eq!(json["coverage"], "CONUS");
        assert_eq!(json["bounds"]["north"], 50.0);
        assert_eq!(json["bounds"]["south"], 20.0);
        assert_eq!(json["bounds"]["east"], -60.0);
        assert_eq!(json["bounds"]["west"], -130.0);
        assert!(json["tile_url"].as_str().unwrap().contains("{z}/{x}/{y}"));

        let meta = meta(State(state)).await.0;
        assert!(meta.ready);
        assert_eq!(meta.strategy, Some(ResolutionStrategy::DirectoryListing));
    }

    #[tokio::test]
    async fn unresolvable_dataset_still_returns_secondary_tiles() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let state = state_for(&server, Config::default());
        let before = Utc::now();
        let response = radar_data(State(state)).await;

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["success"], true);
        assert_eq!(json["source"], SECONDARY_SOURCE_LABEL);
        let timestamp = chrono::DateTime::parse_from_rfc3339(json["timestamp"].as_str().unwrap())
            .unwrap()
            .with_timezone(&Utc);
        assert!((timestamp - before).num_seconds().abs() <= 5);
    }

    #[tokio::test]
    async fn invalid_tile_template_returns_500_failure_payload() {
        let server = MockServer::start().await;
        let cfg = Config {
            fallback_tile_url: "https://tiles.example.test/static.png".to_string(),
            ..Config::default()
        };
        let state = state_for(&server, cfg);
        let response = radar_data(State(state.clone())).await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(response).await;
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "Failed to fetch radar data");
        assert!(json["message"].as_str().unwrap().contains("placeholder"));
        assert!(server.received_requests().await.unwrap().is_empty());
        assert!(state.resolver.snapshot().await.entry.is_none());
    }

    #[tokio::test]
    async fn meta_reports_not_ready_before_first_refresh() {
        let server = MockServer::start().await;
        let state = state_for(&server, Config::default());
        let meta = meta(State(state)).await.0;
        assert!(!meta.ready);
        assert!(meta.timestamp.is_none());
        assert!(!meta.refreshing);
    }
}
