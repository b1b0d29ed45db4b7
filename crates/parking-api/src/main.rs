//! # Parking API Server
//!
//! Main entry point for the parking occupancy monitoring service.
//! Provides the REST endpoints for lot registration, spot configuration and
//! occupancy reads, and runs the per-lot monitoring tasks behind them.

mod config;
mod error;
mod handlers;
mod routes;
mod state;

use crate::config::ApiConfig;
use crate::routes::create_router;
use crate::state::AppState;

use std::net::SocketAddr;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting Parking Occupancy Server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = ApiConfig::load().unwrap_or_else(|e| {
        warn!("Falling back to environment configuration: {}", e);
        ApiConfig::from_env()
    });
    info!("Configuration loaded");
    info!("   API Port: {}", config.api_port);
    info!("   Store: {:?} {:?}", config.db.backend, config.db.hosts);
    info!("   Images: {}", config.images_dir.display());
    info!("   Cycle interval: {}s", config.cycle_interval_secs);

    // Initialize application state
    let state = AppState::new(config.clone()).await?;
    state.check_store().await;

    // Resume monitoring of lots persisted by a previous run
    match state.supervisor.recover().await {
        Ok(started) => info!(started, "Recovered lot monitoring"),
        Err(e) => error!("Failed to recover lots: {}", e),
    }
    if let Ok(lots) = state.supervisor.list_lots().await {
        state.metrics.set_lots_registered(lots.len() as i64);
    }

    let metrics_listener = state.spawn_metrics_listener();

    // Create router
    let app = create_router(state.clone());
    info!("Routes configured");

    // Start API server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.api_port));
    info!("API server listening on http://{}", addr);
    info!("Metrics available at http://{}/metrics", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.supervisor.shutdown().await;
    metrics_listener.abort();

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize logging with tracing
fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,parking_api=debug,parking_monitor=debug"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(filter)
        .init();
}

/// Graceful shutdown handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install terminate handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received terminate signal, shutting down...");
        }
    }
}
