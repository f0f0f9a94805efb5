//! Headless radar view: drives the display controller against a running
//! radar-tiles server and logs overlay swaps. Type `r` to refresh, `q` to quit.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::oneshot;
use tracing::{info, warn};

use radar_tiles::config::{env_string, env_u64};
use radar_tiles::constants::{
    DEFAULT_REQUEST_TIMEOUT_SECONDS, DEFAULT_SERVER_URL, DISPLAY_REFRESH_INTERVAL_SECONDS,
};
use radar_tiles::display::{DisplayController, MapSurface, OverlayId, RadarEventBus};
use radar_tiles::feed::HttpRadarFeed;
use radar_tiles::utils::init_tracing;

#[derive(Debug, Default)]
struct ConsoleMap {
    next_id: u64,
}

impl MapSurface for ConsoleMap {
    fn init_basemap(&mut self) -> Result<()> {
        info!("Basemap ready");
        Ok(())
    }

    fn add_overlay(&mut self, tile_url: &str) -> Result<OverlayId> {
        self.next_id += 1;
        info!("Overlay {} installed: {tile_url}", self.next_id);
        Ok(OverlayId(self.next_id))
    }

    fn remove_overlay(&mut self, overlay: OverlayId) -> Result<()> {
        info!("Overlay {} removed", overlay.0);
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        info!("Map released");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let server_url = env_string("RADAR_SERVER_URL", DEFAULT_SERVER_URL);
    let refresh_seconds = env_u64(
        "RADAR_DISPLAY_REFRESH_SECONDS",
        DISPLAY_REFRESH_INTERVAL_SECONDS,
    )?;

    let http = Client::builder()
        .timeout(Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECONDS))
        .user_agent("radar-display/1.0")
        .build()
        .context("Failed to build reqwest client")?;
    let feed = HttpRadarFeed::new(http, &server_url);
    info!("Polling {}", feed.endpoint());

    let mut controller = DisplayController::mount(ConsoleMap::default(), feed)
        .await
        .context("Failed to mount radar view")?;
    controller.set_refresh_interval(Duration::from_secs(refresh_seconds));

    let mut view = controller.subscribe_view();
    tokio::spawn(async move {
        let mut reported = (None, None);
        while view.changed().await.is_ok() {
            let state = view.borrow_and_update().clone();
            let current = (state.last_update, state.error_message.clone());
            if current == reported {
                continue;
            }
            match &state.error_message {
                Some(message) => warn!("Radar view error: {message}"),
                None => info!(
                    "Radar data from {} at {:?} ({}s old)",
                    state.source.as_deref().unwrap_or("unknown"),
                    state.last_update,
                    state.data_age_seconds
                ),
            }
            reported = current;
        }
    });

    let bus = RadarEventBus::new();
    let (stop, shutdown) = oneshot::channel();
    let view_task = tokio::spawn(controller.run(bus.subscribe(), shutdown));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => match line.context("Failed to read stdin")? {
                Some(command) if command.trim() == "r" => {
                    bus.dispatch_refresh();
                }
                Some(command) if command.trim() == "q" => break,
                Some(_) => {}
                None => break,
            },
        }
    }

    let _ = stop.send(());
    view_task.await.context("Radar view task failed")?;
    Ok(())
}
