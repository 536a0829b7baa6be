//! HTTP surface of the gateway: file streaming, health checks and the server loop.

use std::net::SocketAddr;

use axum::routing::get;
use axum::Router;
use http::header::{ACCEPT, ORIGIN, RANGE};
use http::Method;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{DefaultOnFailure, DefaultOnResponse, TraceLayer};
use tower_http::LatencyUnit;

pub mod handlers;
pub mod health;

pub use handlers::not_found_handler;

use crate::ServiceState;

const STATUS_PREFIX: &str = "/_status";

/// Routes with state applied, no middleware
pub fn router(state: ServiceState) -> Router {
    Router::new()
        .route("/files/:file_id", get(handlers::files::handler))
        .nest(STATUS_PREFIX, health::router(state.clone()))
        .fallback(not_found_handler)
        .with_state(state)
}

/// Serve [`router`] with CORS and request tracing until `shutdown_rx` fires
pub async fn run(
    listen_addr: SocketAddr,
    log_level: tracing::Level,
    state: ServiceState,
    mut shutdown_rx: watch::Receiver<()>,
) -> Result<(), HttpServerError> {
    let cors_layer = CorsLayer::new()
        .allow_methods(vec![Method::GET, Method::HEAD])
        .allow_headers(vec![ACCEPT, ORIGIN, RANGE])
        .allow_origin(Any)
        .allow_credentials(false);

    let trace_layer = TraceLayer::new_for_http()
        .on_response(
            DefaultOnResponse::new()
                .include_headers(false)
                .level(log_level)
                .latency_unit(LatencyUnit::Micros),
        )
        .on_failure(DefaultOnFailure::new().latency_unit(LatencyUnit::Micros));

    let router = router(state).layer(cors_layer).layer(trace_layer);

    tracing::info!(addr = ?listen_addr, "gateway listening");
    let listener = tokio::net::TcpListener::bind(listen_addr).await?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        })
        .await?;

    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum HttpServerError {
    #[error("an error occurred running the HTTP server: {0}")]
    ServingFailed(#[from] std::io::Error),
}
