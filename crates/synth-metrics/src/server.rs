//! HTTP endpoint serving the exporter.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use axum::routing::{Router, get};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::{GeneratorError, Result};
use crate::exporter::MetricsExporter;

/// Builds the router: `GET /metrics` and `GET /health`.
pub fn create_router(exporter: Arc<MetricsExporter>) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/health", get(health))
        .with_state(exporter)
        .layer(TraceLayer::new_for_http())
}

async fn metrics(State(exporter): State<Arc<MetricsExporter>>) -> impl IntoResponse {
    (
        [(CONTENT_TYPE, MetricsExporter::content_type())],
        exporter.encode(),
    )
}

async fn health() -> &'static str {
    "ok"
}

/// Binds the metrics listener.
///
/// # Errors
///
/// Returns [`GeneratorError::BindFailed`] if the address cannot be bound.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| GeneratorError::BindFailed(addr, e))?;
    let local = listener.local_addr()?;
    info!(addr = %local, "metrics endpoint listening");
    Ok(listener)
}

/// Serves the exporter on `listener` until `shutdown` flips to `true`.
///
/// # Errors
///
/// Returns an error if the server fails while accepting connections.
pub async fn serve(
    listener: TcpListener,
    exporter: Arc<MetricsExporter>,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let router = create_router(exporter);

    axum::serve(listener, router)
        .with_graceful_shutdown(wait_for_shutdown(shutdown))
        .await?;

    info!("metrics endpoint shut down");
    Ok(())
}

/// Resolves once `shutdown` holds `true` or its sender is gone.
pub async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            break;
        }
    }
}
