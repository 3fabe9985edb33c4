//! Route Definitions

use super::{
    handlers::{health_handler, metrics_handler, status_handler, AppState},
    websocket::websocket_handler,
};
use axum::{routing::get, Router};
use std::sync::Arc;

/// Build the router with all endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        // Chat and game traffic
        .route("/ws", get(websocket_handler))
        // Metrics endpoint for Prometheus
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}
