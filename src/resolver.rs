//! Latest-dataset resolution with a single-slot cache.
//!
//! A refresh tries the MRMS directory listing first and falls back to probing
//! expected file names across a recent time window. Concurrent callers share
//! one in-flight refresh; a failed refresh never touches the cached entry.

use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use regex::Regex;
use reqwest::Client;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::discovery::{build_file_url, latest_timestamp_in_listing, listing_regex, probe_candidates};
use crate::error::ResolveError;
use crate::grib::inspect_payload;
use crate::http_client::{fetch_bytes, fetch_text};
use crate::types::{CacheEntry, DatasetReference, Resolution, ResolutionStrategy};
use crate::utils::parse_timestamp_utc;

type RefreshFuture = Shared<BoxFuture<'static, Result<DatasetReference, ResolveError>>>;

#[derive(Clone, Debug)]
pub struct CacheSnapshot {
    pub entry: Option<CacheEntry>,
    pub refreshing: bool,
}

pub struct ResolverService {
    cfg: Arc<Config>,
    http: Client,
    listing_regex: Regex,
    cache: RwLock<Option<CacheEntry>>,
    in_flight: Mutex<Option<RefreshFuture>>,
    background: Mutex<Option<JoinHandle<()>>>,
}

impl ResolverService {
    pub fn new(cfg: Arc<Config>, http: Client) -> Result<Self> {
        Ok(Self {
            cfg,
            http,
            listing_regex: listing_regex()?,
            cache: RwLock::new(None),
            in_flight: Mutex::new(None),
            background: Mutex::new(None),
        })
    }

    pub async fn resolve(self: &Arc<Self>) -> Result<DatasetReference, ResolveError> {
        self.resolve_with_status()
            .await
            .map(|resolution| resolution.reference)
    }

    /// Like [`resolve`](Self::resolve), but falls back to the last cached entry
    /// (flagged stale) when a refresh fails.
    pub async fn resolve_with_status(self: &Arc<Self>) -> Result<Resolution, ResolveError> {
        if let Some(reference) = self.fresh_reference(Utc::now()).await {
            return Ok(Resolution {
                reference,
                stale: false,
            });
        }

        match self.refresh().await {
            Ok(reference) => Ok(Resolution {
                reference,
                stale: false,
            }),
            Err(error) => {
                let cached = self.cache.read().await.clone();
                let Some(entry) = cached else {
                    return Err(error);
                };
                warn!(
                    "MRMS refresh failed, serving cached scan {}: {error}",
                    entry.reference.timestamp
                );
                let stale = !is_fresh(entry.fetched_at, Utc::now(), self.cfg.refresh_interval);
                Ok(Resolution {
                    reference: entry.reference,
                    stale,
                })
            }
        }
    }

    /// Runs a refresh, or joins the one already in flight.
    pub async fn refresh(self: &Arc<Self>) -> Result<DatasetReference, ResolveError> {
        let flight = {
            let mut in_flight = self.in_flight.lock().await;
            match in_flight.as_ref() {
                Some(existing) => {
                    debug!("Joining in-flight MRMS refresh");
                    existing.clone()
                }
                None => {
                    let service = Arc::clone(self);
                    let flight = async move {
                        let result = service.refresh_now(Utc::now()).await;
                        service.in_flight.lock().await.take();
                        result
                    }
                    .boxed()
                    .shared();
                    *in_flight = Some(flight.clone());
                    flight
                }
            }
        };
        flight.await
    }

    pub async fn snapshot(&self) -> CacheSnapshot {
        let entry = self.cache.read().await.clone();
        let refreshing = self.in_flight.lock().await.is_some();
        CacheSnapshot { entry, refreshing }
    }

    /// Refreshes immediately and then every `refresh_interval` until disposed.
    pub async fn start_background_refresh(self: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let period = self.cfg.refresh_interval.max(Duration::from_secs(1));

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(service) = weak.upgrade() else {
                    break;
                };
                if let Err(error) = service.refresh().await {
                    warn!("Background MRMS refresh failed: {error}");
                }
            }
        });

        if let Some(previous) = self.background.lock().await.replace(handle) {
            previous.abort();
        }
    }

    pub async fn dispose(&self) {
        if let Some(handle) = self.background.lock().await.take() {
            handle.abort();
            info!("Stopped background MRMS refresh");
        }
    }

    async fn fresh_reference(&self, now: DateTime<Utc>) -> Option<DatasetReference> {
        let cache = self.cache.read().await;
        cache
            .as_ref()
            .filter(|entry| is_fresh(entry.fetched_at, now, self.cfg.refresh_interval))
            .map(|entry| entry.reference.clone())
    }

    async fn refresh_now(&self, now: DateTime<Utc>) -> Result<DatasetReference, ResolveError> {
        let reference = match self.resolve_from_listing().await {
            Ok(reference) => reference,
            Err(error) => {
                warn!("MRMS directory listing failed, probing recent file names: {error}");
                self.resolve_from_probe(now).await?
            }
        };

        *self.cache.write().await = Some(CacheEntry {
            reference: reference.clone(),
            fetched_at: Utc::now(),
        });
        info!(
            "Resolved MRMS scan {} via {:?}",
            reference.timestamp, reference.strategy
        );
        Ok(reference)
    }

    async fn resolve_from_listing(&self) -> Result<DatasetReference, ResolveError> {
        let base_url = &self.cfg.mrms_base_url;
        let listing = fetch_text(&self.http, base_url).await?;
        let timestamp = latest_timestamp_in_listing(&listing, &self.listing_regex)
            .ok_or_else(|| ResolveError::parse(base_url, "listing names no reflectivity files"))?;
        self.fetch_reference(&timestamp, ResolutionStrategy::DirectoryListing)
            .await
    }

    async fn resolve_from_probe(&self, now: DateTime<Utc>) -> Result<DatasetReference, ResolveError> {
        let candidates = probe_candidates(now, self.cfg.probe_step, self.cfg.probe_window);
        for timestamp in &candidates {
            match self
                .fetch_reference(timestamp, ResolutionStrategy::TimeWindowProbe)
                .await
            {
                Ok(reference) => return Ok(reference),
                Err(error) => debug!("MRMS probe {timestamp} missed: {error}"),
            }
        }

        Err(ResolveError::ResolutionExhausted(format!(
            "no MRMS file found within {} minutes ({} candidates probed)",
            self.cfg.probe_window.as_secs() / 60,
            candidates.len()
        )))
    }

    async fn fetch_reference(
        &self,
        timestamp: &str,
        strategy: ResolutionStrategy,
    ) -> Result<DatasetReference, ResolveError> {
        let url = build_file_url(&self.cfg.mrms_base_url, timestamp);
        let scan_time = parse_timestamp_utc(timestamp)
            .ok_or_else(|| ResolveError::parse(&url, format!("invalid timestamp {timestamp}")))?;

        let payload = fetch_bytes(&self.http, &url).await?;
        let envelope = tokio::task::spawn_blocking(move || inspect_payload(&payload))
            .await
            .map_err(|error| ResolveError::parse(&url, format!("join error: {error}")))?
            .map_err(|error| ResolveError::parse(&url, format!("{error:#}")))?;

        Ok(DatasetReference {
            timestamp: scan_time,
            source_file_url: url,
            bounding_box: self.cfg.coverage_bounds.into(),
            strategy,
            grib_edition: envelope.edition,
        })
    }
}

fn is_fresh(fetched_at: DateTime<Utc>, now: DateTime<Utc>, interval: Duration) -> bool {
    match (now - fetched_at).to_std() {
        Ok(age) => age < interval,
        // fetched_at ahead of now only happens on clock steps; treat as just fetched.
        Err(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::discovery::build_file_name;
    use crate::grib::tests::sample_grib_gz;
    use crate::types::BoundingBox;

    fn service_for(server: &MockServer, cfg: Config) -> Arc<ResolverService> {
        let cfg = Config {
            mrms_base_url: format!("{}/2D/", server.uri()),
            ..cfg
        };
        let http = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        Arc::new(ResolverService::new(Arc::new(cfg), http).unwrap())
    }

    fn listing(timestamps: &[&str]) -> String {
        timestamps
            .iter()
            .map(|stamp| {
                let name = build_file_name(stamp);
                format!("<a href=\"{name}\">{name}</a>\n")
            })
            .collect()
    }

    async fn mount_file(server: &MockServer, timestamp: &str, expected: u64) {
        Mock::given(method("GET"))
            .and(path(format!("/2D/{}", build_file_name(timestamp))))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(sample_grib_gz()))
            .expect(expected)
            .mount(server)
            .await;
    }

    async fn mount_listing_failure(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/2D/"))
            .respond_with(ResponseTemplate::new(503))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn listing_strategy_selects_latest_file_and_caches_it() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/2D/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(listing(&[
                "20240101-000000",
                "20240101-001000",
                "20240101-000500",
            ])))
            .expect(1)
            .mount(&server)
            .await;
        mount_file(&server, "20240101-001000", 1).await;

        let service = service_for(&server, Config::default());
        let first = service.resolve().await.unwrap();
        let second = service.resolve().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(
            first.timestamp,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 10, 0).unwrap()
        );
        assert_eq!(first.strategy, ResolutionStrategy::DirectoryListing);
        assert_eq!(first.grib_edition, 2);
        assert!(first.source_file_url.ends_with("_20240101-001000.grib2.gz"));
        assert_eq!(
            first.bounding_box,
            BoundingBox {
                lat_min: 20.0,
                lat_max: 50.0,
                lon_min: -130.0,
                lon_max: -60.0,
            }
        );
    }

    #[tokio::test]
    async fn concurrent_resolves_share_one_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/2D/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(listing(&["20240615-120000"]))
                    .set_delay(Duration::from_millis(200)),
            )
            .expect(1)
            .mount(&server)
            .await;
        mount_file(&server, "20240615-120000", 1).await;

        let service = service_for(&server, Config::default());
        let (left, right) = tokio::join!(service.resolve(), service.resolve());

        assert_eq!(left.unwrap(), right.unwrap());
        assert!(!service.snapshot().await.refreshing);
    }

    #[tokio::test]
    async fn probe_walks_even_minutes_and_stops_at_first_valid_file() {
        let server = MockServer::start().await;
        let now = Utc.with_ymd_and_hms(2024, 6, 15, 12, 5, 42).unwrap();

        Mock::given(method("GET"))
            .and(path(format!("/2D/{}", build_file_name("20240615-120400"))))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/2D/{}", build_file_name("20240615-120200"))))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>busy</html>"))
            .expect(1)
            .mount(&server)
            .await;
        mount_file(&server, "20240615-120000", 1).await;
        mount_file(&server, "20240615-115800", 0).await;

        let service = service_for(&server, Config::default());
        let reference = service.resolve_from_probe(now).await.unwrap();

        assert_eq!(reference.strategy, ResolutionStrategy::TimeWindowProbe);
        assert_eq!(
            reference.timestamp,
            Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn listing_without_matching_files_falls_back_to_time_window_search() {
        let server = MockServer::start().await;
        let now = Utc.with_ymd_and_hms(2024, 6, 15, 12, 5, 42).unwrap();
        Mock::given(method("GET"))
            .and(path("/2D/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<a href=\"MRMS_MergedReflectivityQC_00.50_20240615-120400.grib2.gz\">x</a>",
            ))
            .expect(1)
            .mount(&server)
            .await;
        mount_file(&server, "20240615-120400", 1).await;

        let cfg = Config {
            probe_window: Duration::from_secs(240),
            ..Config::default()
        };
        let service = service_for(&server, cfg);
        let reference = service.refresh_now(now).await.unwrap();

        assert_eq!(reference.strategy, ResolutionStrategy::TimeWindowProbe);
        assert_eq!(
            reference.timestamp,
            Utc.with_ymd_and_hms(2024, 6, 15, 12, 4, 0).unwrap()
        );
        assert_eq!(service.snapshot().await.entry.unwrap().reference, reference);
    }

    #[tokio::test]
    async fn listed_file_failing_inspection_falls_back_to_time_window_search() {
        let server = MockServer::start().await;
        let now = Utc.with_ymd_and_hms(2024, 6, 15, 12, 5, 42).unwrap();
        Mock::given(method("GET"))
            .and(path("/2D/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(listing(&[
                "20240615-120000",
                "20240615-121000",
            ])))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/2D/{}", build_file_name("20240615-121000"))))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
            .expect(1)
            .mount(&server)
            .await;
        // 12:04 is missing upstream; wiremock answers unmatched paths with 404.
        mount_file(&server, "20240615-120200", 1).await;
        mount_file(&server, "20240615-120000", 0).await;

        let cfg = Config {
            probe_window: Duration::from_secs(240),
            ..Config::default()
        };
        let service = service_for(&server, cfg);
        let reference = service.refresh_now(now).await.unwrap();

        assert_eq!(reference.strategy, ResolutionStrategy::TimeWindowProbe);
        assert_eq!(
            reference.timestamp,
            Utc.with_ymd_and_hms(2024, 6, 15, 12, 2, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn exhausted_window_reports_resolution_exhausted_and_leaves_cache_empty() {
        let server = MockServer::start().await;
        mount_listing_failure(&server).await;

        let cfg = Config {
            probe_window: Duration::from_secs(600),
            ..Config::default()
        };
        let service = service_for(&server, cfg);
        let error = service.resolve().await.unwrap_err();

        assert!(matches!(error, ResolveError::ResolutionExhausted(_)));
        assert!(service.snapshot().await.entry.is_none());
        let requests = server.received_requests().await.unwrap();
        // listing + six probe candidates
        assert_eq!(requests.len(), 7);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_entry_and_serves_it_stale() {
        let server = MockServer::start().await;
        mount_listing_failure(&server).await;

        let cfg = Config {
            probe_window: Duration::from_secs(0),
            ..Config::default()
        };
        let service = service_for(&server, cfg);
        let old_fetch = Utc::now() - chrono::Duration::minutes(10);
        let seeded = DatasetReference {
            timestamp: Utc.with_ymd_and_hms(2024, 6, 15, 11, 50, 0).unwrap(),
            source_file_url: "https://example.test/old.grib2.gz".to_string(),
            bounding_box: Config::default().coverage_bounds.into(),
            strategy: ResolutionStrategy::DirectoryListing,
            grib_edition: 2,
        };
        *service.cache.write().await = Some(CacheEntry {
            reference: seeded.clone(),
            fetched_at: old_fetch,
        });

        let resolution = service.resolve_with_status().await.unwrap();

        assert!(resolution.stale);
        assert_eq!(resolution.reference, seeded);
        let entry = service.snapshot().await.entry.unwrap();
        assert_eq!(entry.fetched_at, old_fetch);
        assert_eq!(entry.reference, seeded);
    }

    #[tokio::test]
    async fn background_refresh_warms_cache_until_disposed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/2D/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(listing(&["20240615-120000"])))
            .mount(&server)
            .await;
        mount_file(&server, "20240615-120000", 1).await;

        let service = service_for(&server, Config::default());
        service.start_background_refresh().await;

        let mut warmed = false;
        for _ in 0..50 {
            if service.snapshot().await.entry.is_some() {
                warmed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(warmed);

        service.dispose().await;
        assert!(service.background.lock().await.is_none());
        // Served from cache: the file mock above expects exactly one fetch.
        service.resolve().await.unwrap();
    }

    #[test]
    fn entries_expire_after_refresh_interval() {
        let now = Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap();
        let interval = Duration::from_secs(120);
        assert!(is_fresh(now - chrono::Duration::seconds(119), now, interval));
        assert!(!is_fresh(now - chrono::Duration::seconds(120), now, interval));
        assert!(is_fresh(now + chrono::Duration::seconds(5), now, interval));
    }
}
