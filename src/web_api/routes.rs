//! API Routes

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use crate::blacklist::BlacklistEntry;
use crate::camera_registry::Camera;
use crate::envelope::Transport;
use crate::error::Error;
use crate::ingest::IngestOutcome;
use crate::models::ApiResponse;
use crate::state::AppState;
use crate::ws_adapter::websocket_handler;

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health & Status
        .route("/healthz", get(super::health_check))
        .route("/api/status", get(super::server_status))
        // Records (canonical event stream)
        .route("/api/records", get(list_records))
        // Cameras
        .route("/api/cameras", get(list_cameras))
        .route("/api/cameras/:id", get(get_camera))
        // Alerts
        .route("/api/alerts", get(list_alerts))
        // Blacklist snapshot administration
        .route("/api/blacklist", get(list_blacklist))
        .route("/api/blacklist", put(replace_blacklist))
        // Envelope ingestion over REST (same pipeline as push transports)
        .route("/api/events", post(ingest_event))
        // Device WebSocket transport
        .route("/api/ws", get(websocket_handler))
        .with_state(state)
}

// ========================================
// Record Handlers
// ========================================

#[derive(Debug, Deserialize)]
struct RecordQuery {
    limit: Option<usize>,
    camera: Option<String>,
}

async fn list_records(
    State(state): State<AppState>,
    Query(query): Query<RecordQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(100).min(1000);
    let records = match query.camera {
        Some(camera) => state.records.by_device(&camera, limit).await,
        None => state.records.latest(limit).await,
    };
    Json(ApiResponse::success(records))
}

// ========================================
// Camera Handlers
// ========================================

async fn list_cameras(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.registry.list()))
}

async fn get_camera(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Camera>>, Error> {
    match state.registry.get(&id) {
        Some(camera) => Ok(Json(ApiResponse::success(camera))),
        None => Err(Error::NotFound(format!("camera {}", id))),
    }
}

// ========================================
// Alert & Blacklist Handlers
// ========================================

#[derive(Debug, Deserialize)]
struct AlertQuery {
    limit: Option<usize>,
}

async fn list_alerts(
    State(state): State<AppState>,
    Query(query): Query<AlertQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(100).min(1000);
    Json(ApiResponse::success(state.alerts.latest(limit).await))
}

async fn list_blacklist(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.blacklist.list().await))
}

async fn replace_blacklist(
    State(state): State<AppState>,
    Json(entries): Json<Vec<BlacklistEntry>>,
) -> Result<Json<ApiResponse<serde_json::Value>>, Error> {
    if entries.iter().any(|e| e.plate_pattern.trim().is_empty()) {
        return Err(Error::Validation(
            "blacklist entries must have a non-empty plate_pattern".to_string(),
        ));
    }
    let count = entries.len();
    state.blacklist.replace(entries).await;
    Ok(Json(ApiResponse::success(json!({"entries": count}))))
}

// ========================================
// REST Ingestion
// ========================================

/// Accept one envelope over REST. Runs the identical pipeline as the
/// WebSocket and MQTT adapters; failures map through the crate error
/// type.
async fn ingest_event(
    State(state): State<AppState>,
    body: axum::body::Bytes,
) -> Result<Response, Error> {
    match state.pipeline.ingest(Transport::Rest, &body).await {
        IngestOutcome::Accepted(result) => Ok((
            StatusCode::CREATED,
            Json(ApiResponse::success(json!({
                "record_id": result.record_id,
                "out_of_order": result.out_of_order,
                "alert": result.alert,
            }))),
        )
            .into_response()),
        IngestOutcome::Duplicate => Ok((
            StatusCode::OK,
            Json(ApiResponse::<serde_json::Value>::success(
                json!({"duplicate": true}),
            )),
        )
            .into_response()),
        IngestOutcome::InFlight => Err(Error::InFlight(
            "a concurrent delivery of this message is in progress".to_string(),
        )),
        IngestOutcome::Rejected(e) => Err(Error::Decode(e)),
        IngestOutcome::StoreFailed(e) => Err(Error::Store(e)),
    }
}
