//! Client-side radar overlay controller.
//!
//! Owns a map surface, refetches the tile payload on an interval or on a
//! `refresh-radar` signal, and swaps the overlay layer so that exactly one is
//! active. Fetches are single-flight per view; a response older than the one
//! already displayed is dropped.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::constants::{
    DISPLAY_CLOCK_TICK_SECONDS, DISPLAY_REFRESH_INTERVAL_SECONDS, EVENT_BUS_CAPACITY,
    REFRESH_RADAR_EVENT,
};
use crate::error::DisplayError;
use crate::tiles::RadarTilePayload;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OverlayId(pub u64);

/// Rendering backend the controller drives. Implementations own the actual map.
pub trait MapSurface {
    fn init_basemap(&mut self) -> Result<()>;
    fn add_overlay(&mut self, tile_url: &str) -> Result<OverlayId>;
    fn remove_overlay(&mut self, overlay: OverlayId) -> Result<()>;
    fn release(&mut self) -> Result<()>;
}

pub trait RadarFeed: Send + Sync + 'static {
    fn fetch_latest(
        &self,
    ) -> impl Future<Output = Result<RadarTilePayload, DisplayError>> + Send;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControllerPhase {
    Initializing,
    Ready { has_error: bool },
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ViewState {
    pub last_update: Option<DateTime<Utc>>,
    pub is_loading: bool,
    pub error_message: Option<String>,
    pub data_age_seconds: i64,
    pub source: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RefreshSignal {
    pub requested_at: DateTime<Utc>,
}

/// Process-wide bus carrying `refresh-radar` signals to every mounted view.
#[derive(Clone, Debug)]
pub struct RadarEventBus {
    sender: broadcast::Sender<RefreshSignal>,
}

impl Default for RadarEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl RadarEventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self { sender }
    }

    pub fn event_name(&self) -> &'static str {
        REFRESH_RADAR_EVENT
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RefreshSignal> {
        self.sender.subscribe()
    }

    /// Returns the number of views that received the signal.
    pub fn dispatch_refresh(&self) -> usize {
        let signal = RefreshSignal {
            requested_at: Utc::now(),
        };
        self.sender.send(signal).unwrap_or(0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct FetchTicket(u64);

struct InFlight {
    ticket: FetchTicket,
    future: BoxFuture<'static, Result<RadarTilePayload, DisplayError>>,
}

pub struct DisplayController<M: MapSurface, F: RadarFeed> {
    map: Option<M>,
    feed: Arc<F>,
    phase: ControllerPhase,
    view: watch::Sender<ViewState>,
    active_overlay: Option<OverlayId>,
    refresh_interval: Duration,
    issued: u64,
    applied: u64,
    pending: usize,
}

impl<M: MapSurface, F: RadarFeed> DisplayController<M, F> {
    /// Initializes the basemap and performs the first fetch.
    ///
    /// On initialization failure the surface is released before returning.
    pub async fn mount(mut map: M, feed: F) -> Result<Self, DisplayError> {
        if let Err(error) = map.init_basemap() {
            if let Err(release_error) = map.release() {
                warn!("Failed to release map after init failure: {release_error:#}");
            }
            return Err(DisplayError::MapInitFailed(format!("{error:#}")));
        }

        let (view, _) = watch::channel(ViewState::default());
        let mut controller = Self {
            map: Some(map),
            feed: Arc::new(feed),
            phase: ControllerPhase::Initializing,
            view,
            active_overlay: None,
            refresh_interval: Duration::from_secs(DISPLAY_REFRESH_INTERVAL_SECONDS),
            issued: 0,
            applied: 0,
            pending: 0,
        };
        controller.refresh().await;
        Ok(controller)
    }

    pub fn set_refresh_interval(&mut self, period: Duration) {
        self.refresh_interval = period.max(Duration::from_secs(1));
    }

    pub fn phase(&self) -> ControllerPhase {
        self.phase
    }

    pub fn active_overlay(&self) -> Option<OverlayId> {
        self.active_overlay
    }

    pub fn view(&self) -> ViewState {
        self.view.borrow().clone()
    }

    pub fn subscribe_view(&self) -> watch::Receiver<ViewState> {
        self.view.subscribe()
    }

    pub async fn refresh(&mut self) {
        let ticket = self.begin_fetch();
        let result = self.feed.fetch_latest().await;
        self.complete_fetch(ticket, result, Utc::now());
    }

    pub fn begin_fetch(&mut self) -> FetchTicket {
        self.issued += 1;
        self.pending += 1;
        self.view.send_modify(|view| view.is_loading = true);
        FetchTicket(self.issued)
    }

    /// Applies a fetch outcome. Returns `false` when the response was dropped
    /// because a newer one is already displayed.
    pub fn complete_fetch(
        &mut self,
        ticket: FetchTicket,
        result: Result<RadarTilePayload, DisplayError>,
        now: DateTime<Utc>,
    ) -> bool {
        self.pending = self.pending.saturating_sub(1);
        let still_loading = self.pending > 0;

        if ticket.0 <= self.applied {
            debug!(
                "Dropping radar response {} older than displayed {}",
                ticket.0, self.applied
            );
            self.view.send_modify(|view| view.is_loading = still_loading);
            return false;
        }

        match result {
            Ok(payload) => match self.swap_overlay(&payload.tile_url) {
                Ok(()) => {
                    self.applied = ticket.0;
                    self.phase = ControllerPhase::Ready { has_error: false };
                    let last_update = DateTime::parse_from_rfc3339(&payload.timestamp)
                        .map(|ts| ts.with_timezone(&Utc))
                        .unwrap_or(now);
                    self.view.send_modify(|view| {
                        view.last_update = Some(last_update);
                        view.error_message = None;
                        view.is_loading = still_loading;
                        view.source = Some(payload.source.clone());
                        view.data_age_seconds = age_seconds(Some(last_update), now);
                    });
                }
                Err(error) => self.fail(DisplayError::FetchFailed(format!("{error:#}")), still_loading),
            },
            Err(error) => self.fail(error, still_loading),
        }
        true
    }

    pub fn tick(&mut self, now: DateTime<Utc>) {
        self.view
            .send_modify(|view| view.data_age_seconds = age_seconds(view.last_update, now));
    }

    /// Drives the view until `shutdown` fires, then unmounts.
    pub async fn run(
        mut self,
        events: broadcast::Receiver<RefreshSignal>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        let period = self.refresh_interval;
        let mut refresh_timer = interval_at(Instant::now() + period, period);
        refresh_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut clock = interval(Duration::from_secs(DISPLAY_CLOCK_TICK_SECONDS));
        let mut events = Some(events);
        let mut in_flight: Option<InFlight> = None;

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = refresh_timer.tick() => self.trigger(&mut in_flight, "interval"),
                signal = next_signal(&mut events) => match signal {
                    Ok(signal) => {
                        debug!("Received {REFRESH_RADAR_EVENT} at {}", signal.requested_at);
                        self.trigger(&mut in_flight, REFRESH_RADAR_EVENT);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        debug!("Skipped {skipped} queued {REFRESH_RADAR_EVENT} signals");
                        self.trigger(&mut in_flight, REFRESH_RADAR_EVENT);
                    }
                    Err(RecvError::Closed) => events = None,
                },
                _ = clock.tick() => self.tick(Utc::now()),
                (ticket, result) = settle(&mut in_flight) => {
                    in_flight = None;
                    self.complete_fetch(ticket, result, Utc::now());
                }
            }
        }

        drop(refresh_timer);
        drop(events);
        self.unmount();
    }

    /// Removes the overlay and releases the map. Each step runs even if the
    /// previous one failed.
    pub fn unmount(mut self) {
        self.release_map();
        info!("Radar view unmounted");
    }

    fn trigger(&mut self, slot: &mut Option<InFlight>, reason: &str) {
        if slot.is_some() {
            debug!("Radar fetch already in flight; coalescing {reason} trigger");
            return;
        }
        let ticket = self.begin_fetch();
        let feed = Arc::clone(&self.feed);
        *slot = Some(InFlight {
            ticket,
            future: async move { feed.fetch_latest().await }.boxed(),
        });
    }

    fn swap_overlay(&mut self, tile_url: &str) -> Result<()> {
        let map = self
            .map
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("map has been released"))?;
        // The previous layer stays installed until its replacement is.
        let installed = map.add_overlay(tile_url)?;
        if let Some(previous) = self.active_overlay.replace(installed) {
            if let Err(error) = map.remove_overlay(previous) {
                warn!("Failed to remove radar overlay {}: {error:#}", previous.0);
            }
        }
        Ok(())
    }

    fn fail(&mut self, error: DisplayError, still_loading: bool) {
        warn!("Radar refresh failed: {error}");
        self.phase = ControllerPhase::Ready { has_error: true };
        self.view.send_modify(|view| {
            view.error_message = Some(error.to_string());
            view.is_loading = still_loading;
        });
    }

    fn release_map(&mut self) {
        let Some(mut map) = self.map.take() else {
            return;
        };
        if let Some(overlay) = self.active_overlay.take() {
            if let Err(error) = map.remove_overlay(overlay) {
                warn!("Failed to remove radar overlay {}: {error:#}", overlay.0);
            }
        }
        if let Err(error) = map.release() {
            warn!("Failed to release map: {error:#}");
        }
    }
}

impl<M: MapSurface, F: RadarFeed> Drop for DisplayController<M, F> {
    fn drop(&mut self) {
        self.release_map();
    }
}

fn age_seconds(last_update: Option<DateTime<Utc>>, now: DateTime<Utc>) -> i64 {
    last_update
        .map(|ts| (now - ts).num_seconds().max(0))
        .unwrap_or(0)
}

async fn next_signal(
    events: &mut Option<broadcast::Receiver<RefreshSignal>>,
) -> Result<RefreshSignal, RecvError> {
    match events.as_mut() {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}

async fn settle(
    slot: &mut Option<InFlight>,
) -> (FetchTicket, Result<RadarTilePayload, DisplayError>) {
    match slot.as_mut() {
        Some(flight) => {
            let result = (&mut flight.future).await;
            (flight.ticket, result)
        }
        None => std::future::pending().await,
    }
}
