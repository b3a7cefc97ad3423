//! WsAdapter - WebSocket Transport Adapter
//!
//! ## Responsibilities
//!
//! - One logical connection per camera, registration-gated: a connection
//!   must deliver a registration envelope before any other event type
//! - Per-message ack/error frames carrying the message_id
//! - Immediate Offline signal to the registry on disconnect (the most
//!   timely liveness signal available)
//!
//! Decode failures are answered with an error frame and dropped; they
//! never tear down the adapter or the connection.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::envelope::{self, DataType, Transport};
use crate::ingest::IngestOutcome;
use crate::record_store::RecordId;
use crate::state::AppState;

/// Tracks which WebSocket connection, if any, is a camera's active
/// transport. Disconnects only mark a camera Offline when the closing
/// connection is still the active one.
pub struct CameraConnections {
    active: RwLock<HashMap<String, Uuid>>,
    connection_count: AtomicU64,
}

impl CameraConnections {
    pub fn new() -> Self {
        Self {
            active: RwLock::new(HashMap::new()),
            connection_count: AtomicU64::new(0),
        }
    }

    pub fn connection_opened(&self) {
        self.connection_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.connection_count.fetch_sub(1, Ordering::Relaxed);
    }

    /// Bind a camera to a connection after successful registration
    pub async fn bind(&self, camera_id: &str, conn_id: Uuid) {
        let mut active = self.active.write().await;
        if let Some(previous) = active.insert(camera_id.to_string(), conn_id) {
            if previous != conn_id {
                tracing::info!(
                    camera_id = %camera_id,
                    old_connection = %previous,
                    new_connection = %conn_id,
                    "Camera re-registered on a new connection"
                );
            }
        }
    }

    /// Remove the binding if `conn_id` is still the active connection.
    /// Returns true when removed.
    pub async fn unbind_if_active(&self, camera_id: &str, conn_id: Uuid) -> bool {
        let mut active = self.active.write().await;
        match active.get(camera_id) {
            Some(current) if *current == conn_id => {
                active.remove(camera_id);
                true
            }
            _ => false,
        }
    }

    pub fn count(&self) -> u64 {
        self.connection_count.load(Ordering::Relaxed)
    }
}

impl Default for CameraConnections {
    fn default() -> Self {
        Self::new()
    }
}

/// Reply frame sent back on the same connection
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WsReply {
    Ack {
        message_id: String,
        duplicate: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        record_id: Option<RecordId>,
        out_of_order: bool,
    },
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
        code: &'static str,
        message: String,
    },
}

/// WebSocket upgrade handler
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let conn_id = Uuid::new_v4();
    state.connections.connection_opened();

    tracing::info!(connection_id = %conn_id, "Camera WebSocket connected");

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    // Forward reply frames to the socket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(Message::Text(msg)).await.is_err() {
                break;
            }
        }
    });

    // Camera bound to this connection once registration is accepted
    let mut registered_camera: Option<String> = None;

    while let Some(result) = receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                let reply =
                    process_message(&state, &mut registered_camera, conn_id, text.as_bytes()).await;
                match serde_json::to_string(&reply) {
                    Ok(json) => {
                        if tx.send(json).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::error!(connection_id = %conn_id, error = %e, "Failed to serialize reply");
                    }
                }
            }
            Ok(Message::Ping(_)) => {
                // Pong is handled automatically by axum
            }
            Ok(Message::Close(_)) => {
                tracing::info!(connection_id = %conn_id, "Camera WebSocket disconnected");
                break;
            }
            Err(e) => {
                tracing::warn!(connection_id = %conn_id, error = %e, "WebSocket error");
                break;
            }
            _ => {}
        }
    }

    // Disconnect: only demote the camera if this connection was still
    // its active transport (it may have re-registered elsewhere).
    if let Some(camera_id) = registered_camera {
        if state.connections.unbind_if_active(&camera_id, conn_id).await {
            state.registry.mark_offline(&camera_id);
        }
    }
    state.connections.connection_closed();
    send_task.abort();
}

/// Decode, gate on registration, run the shared pipeline, and map the
/// outcome to a reply frame.
async fn process_message(
    state: &AppState,
    registered_camera: &mut Option<String>,
    conn_id: Uuid,
    raw: &[u8],
) -> WsReply {
    let envelope = match envelope::decode(Transport::WebSocket, raw) {
        Ok(env) => env,
        Err(e) => {
            tracing::warn!(connection_id = %conn_id, error = %e, "Undecodable WebSocket message");
            return WsReply::Error {
                message_id: None,
                code: "decode_error",
                message: e.to_string(),
            };
        }
    };

    let message_id = envelope.message_id.clone();
    let device = envelope.edge_device_id.clone();
    let is_registration = envelope.data_type == DataType::Registration;

    if registered_camera.is_none() && !is_registration {
        tracing::warn!(
            connection_id = %conn_id,
            edge_device_id = %device,
            data_type = %envelope.data_type,
            "Event before registration rejected"
        );
        return WsReply::Error {
            message_id: Some(message_id),
            code: "not_registered",
            message: "connection must send a registration event first".to_string(),
        };
    }

    let outcome = state
        .pipeline
        .ingest_envelope(Transport::WebSocket, envelope)
        .await;

    match outcome {
        IngestOutcome::Accepted(result) => {
            if is_registration {
                *registered_camera = Some(device.clone());
                state.connections.bind(&device, conn_id).await;
            }
            WsReply::Ack {
                message_id,
                duplicate: false,
                record_id: Some(result.record_id),
                out_of_order: result.out_of_order,
            }
        }
        IngestOutcome::Duplicate => {
            // A re-sent registration still authenticates the connection
            if is_registration {
                *registered_camera = Some(device.clone());
                state.connections.bind(&device, conn_id).await;
            }
            WsReply::Ack {
                message_id,
                duplicate: true,
                record_id: None,
                out_of_order: false,
            }
        }
        IngestOutcome::InFlight => WsReply::Error {
            message_id: Some(message_id),
            code: "in_flight",
            message: "a concurrent delivery of this message is in progress".to_string(),
        },
        IngestOutcome::Rejected(e) => WsReply::Error {
            message_id: Some(message_id),
            code: "decode_error",
            message: e.to_string(),
        },
        IngestOutcome::StoreFailed(e) => WsReply::Error {
            message_id: Some(message_id),
            code: "store_error",
            message: e.to_string(),
        },
    }
}
