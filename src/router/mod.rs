//! # HTTP Router and Health Checks
//!
//! A small HTTP server next to the importer, for load balancer health checks and for
//! watching a long import.
//!
//! ## Endpoints
//!
//! - `GET /` - returns 200 "Healthy" while the import has not failed, 503 after it failed
//! - `GET /status` - JSON snapshot of the import: state, queue depth, imported count and
//!   the last block hash fetched
//!
//! ## Configuration
//!
//! The bind address comes from `--router` or the `ROUTER_ENDPOINT` environment variable,
//! e.g. "0.0.0.0:3000". Without either, no router is started.

use axum::{extract::State, http::StatusCode, routing::get, Router};
use eyre::Result;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::importer::block_service::ImportHandle;

mod handlers;

/// The routes, bound to the import they report on.
pub fn router(handle: ImportHandle) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/status", get(handlers::status))
        .with_state(handle)
}

pub async fn initialize_router(
    endpoint: &str,
    handle: ImportHandle,
    shutdown: CancellationToken,
) -> Result<()> {
    let listener: TcpListener = TcpListener::bind(endpoint)
        .await
        .map_err(|e| eyre::eyre!("Failed to bind router to {}: {}", endpoint, e))?;

    info!(
        "->> LISTENING on {}\n",
        listener
            .local_addr()
            .map_err(|e| eyre::eyre!("Failed to get local address: {}", e))?
    );
    axum::serve(listener, router(handle).into_make_service())
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    Ok(())
}

async fn health(State(handle): State<ImportHandle>) -> (StatusCode, &'static str) {
    if handle.has_failed() {
        return (StatusCode::SERVICE_UNAVAILABLE, "Import failed");
    }
    (StatusCode::OK, "Healthy")
}

async fn shutdown_signal(shutdown: CancellationToken) {
    shutdown.cancelled().await;
    info!("Shutdown signal received, shutting down router");
}
