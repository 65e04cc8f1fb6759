//! Exposition HTTP server: `/metrics` renders the registry, anything else gets a hint.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use tower_http::compression::CompressionLayer;
use tracing::{error, info};

use slowlog_core::registry::MetricRegistry;

pub(crate) const METRICS_PATH: &str = "/metrics";
pub(crate) const HINT: &str = "Please use /metrics";

pub(crate) fn router(registry: Arc<MetricRegistry>) -> Router {
    Router::new()
        .route(METRICS_PATH, any(handle_metrics))
        .fallback(handle_hint)
        .with_state(registry)
        .layer(CompressionLayer::new())
}

/// Serves until `shutdown` resolves.
pub(crate) async fn serve(
    addr: SocketAddr,
    registry: Arc<MetricRegistry>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "listening");
    axum::serve(listener, router(registry))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn handle_metrics(State(registry): State<Arc<MetricRegistry>>) -> Response {
    match registry.render() {
        Ok(body) => ([(header::CONTENT_TYPE, registry.content_type())], body).into_response(),
        Err(e) => {
            error!(error = %e, "failed to render metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to render metrics").into_response()
        }
    }
}

async fn handle_hint() -> &'static str {
    HINT
}
