use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use super::api::{self, AppState, SharedState};
use crate::config::ShipyardConfig;
use crate::deploy::ingest::GitCliCloner;
use crate::deploy::proxy::LoggingRegistrar;

/// Build the full application router: API, project serving and request tracing.
pub fn build_router(state: SharedState) -> Router {
    api::api_router()
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server and block until a shutdown signal arrives.
pub async fn start_server(config: ShipyardConfig) -> Result<()> {
    for warning in config.validate() {
        warn!(%warning, "configuration warning");
    }
    std::fs::create_dir_all(&config.paths.serving_dir).with_context(|| {
        format!(
            "Failed to create serving directory {}",
            config.paths.serving_dir.display()
        )
    })?;

    let addr = config.server.listen;
    let cloner = Arc::new(GitCliCloner::new(&config));
    let state = Arc::new(
        AppState::new(config, cloner, Arc::new(LoggingRegistrar))
            .context("Failed to open the published project store")?,
    );

    let app = build_router(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, "shipyard listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    state.processes.shutdown().await;
    state.cleanup.drain().await;
    info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
