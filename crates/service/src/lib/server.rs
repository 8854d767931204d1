use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use prometheus::{Encoder, Registry, TextEncoder};
use tower_http::trace::TraceLayer;

pub struct AppState {
    pub registry: Registry,
}

pub async fn run_server(state: Arc<AppState>, addr: SocketAddr) {
    let app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .unwrap_or_else(|e| panic!("Failed to bind service address {addr}: {e:?}"));
    tracing::info!("Starting service at {:?}", addr);
    axum::serve(listener, app)
        .await
        .unwrap_or_else(|e| panic!("Service server failed: {e:?}"));
}

async fn health() -> &'static str {
    "ok"
}

async fn metrics_handler(state: axum::extract::State<Arc<AppState>>) -> Response {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    let metric_families = state.registry.gather();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to collect metrics").into_response();
    }
    Response::builder()
        .header("Content-Type", encoder.format_type())
        .body(buffer.into())
        .unwrap_or_else(|_| (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response())
}
