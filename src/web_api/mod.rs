//! WebAPI - REST API Endpoints
//!
//! ## Responsibilities
//!
//! - Read endpoints over the canonical record stream and registry
//! - Blacklist snapshot administration
//! - WebSocket upgrade for the camera transport
//! - Optional envelope ingestion over POST (same pipeline as the
//!   push transports)

mod routes;

pub use routes::create_router;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::models::{HealthResponse, StatusResponse};
use crate::state::AppState;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let response = HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_sec: state.uptime_sec(),
        mqtt_enabled: state.config.mqtt_enabled,
        ws_connections: state.connections.count(),
    };

    Json(response)
}

/// Server status endpoint
pub async fn server_status(State(state): State<AppState>) -> impl IntoResponse {
    let response = StatusResponse {
        cameras_total: state.registry.count(),
        cameras_online: state.registry.online_count(),
        records_stored: state.records.count().await,
        alerts_total: state.alerts.count().await,
        dedup_entries: state.ledger.len(),
        events_buffered: state.router.buffered_count(),
        ws_connections: state.connections.count(),
    };

    Json(response)
}
