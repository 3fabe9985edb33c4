//! Request Handlers

use super::{errors::ApiError, middleware::RequestId, websocket::Hub};
use crate::metrics::RoomMetrics;
use crate::room::{RoomHandle, RoomStatus};
use axum::{
    extract::State,
    http::header::CONTENT_TYPE,
    response::IntoResponse,
    Extension, Json,
};
use serde::Serialize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Shared application state
pub struct AppState {
    pub room: RoomHandle,
    pub hub: Arc<Hub>,
    pub metrics: Arc<RoomMetrics>,
    pub version: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    /// Open sockets, joined or not
    pub sockets: usize,
    /// Joined users
    pub connections: u64,
    pub room_running: bool,
}

/// Health check handler
/// GET /health
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let room_running = !state.room.is_closed();
    Json(HealthResponse {
        status: if room_running { "Running" } else { "Stopped" }.to_string(),
        version: state.version.clone(),
        uptime_secs: state.metrics.uptime().as_secs(),
        sockets: state.hub.connection_count(),
        connections: state.metrics.connections_active.load(Ordering::Relaxed),
        room_running,
    })
}

/// Live room snapshot, answered by the room task itself
/// GET /status
pub async fn status_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<RoomStatus>, ApiError> {
    state.room.status().await.map(Json).ok_or_else(|| {
        ApiError::service_unavailable(request_id.0, "Room is not running".to_string())
    })
}

/// Prometheus metrics
/// GET /metrics
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        state.metrics.to_prometheus_format(),
    )
}
