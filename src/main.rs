use std::sync::Arc;

use anyhow::{Context, Result};
use reqwest::Client;
use tracing::info;

use radar_tiles::api::build_router;
use radar_tiles::config::Config;
use radar_tiles::resolver::ResolverService;
use radar_tiles::types::AppState;
use radar_tiles::utils::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cfg = Arc::new(Config::from_env()?);

    let http = Client::builder()
        .timeout(cfg.request_timeout)
        .user_agent("radar-tiles/1.0")
        .build()
        .context("Failed to build reqwest client")?;

    let resolver = Arc::new(ResolverService::new(cfg.clone(), http)?);
    resolver.start_background_refresh().await;

    let state = AppState {
        cfg: cfg.clone(),
        resolver: resolver.clone(),
    };
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&cfg.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", cfg.listen_addr))?;

    info!(
        "Radar tile service listening on {} (MRMS source {})",
        cfg.listen_addr, cfg.mrms_base_url
    );
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed");

    resolver.dispose().await;
    served
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
            sigterm.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
