//! Observability HTTP Routes
//!
//! Health on both services, counters on the gateway.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;

use super::gateway_routes::GatewayState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Gateway observability routes
pub fn observability_routes() -> Router<Arc<GatewayState>> {
    Router::new()
        .route("/health", get(|| health_handler("gateway")))
        .route("/metrics", get(metrics_handler))
}

/// Health route for the storage node
pub fn health_routes<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route("/health", get(|| health_handler("node")))
}

async fn health_handler(service: &'static str) -> impl IntoResponse {
    let response = HealthResponse {
        status: "ok".to_string(),
        service: service.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    (StatusCode::OK, Json(response))
}

async fn metrics_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.metrics.snapshot()))
}
