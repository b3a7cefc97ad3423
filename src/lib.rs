//! LPR Ingestion Server
//!
//! Multi-transport ingestion and normalization layer for license-plate
//! recognition telemetry from edge camera devices.
//!
//! ## Architecture (9 Components)
//!
//! 1. EnvelopeCodec - Wire envelope validation and canonicalization
//! 2. DedupLedger - Cross-transport message_id deduplication (claim/commit)
//! 3. CameraRegistry - Camera lifecycle and connectivity state machine
//! 4. EventRouter - Per-device ordered dispatch to downstream sinks
//! 5. BlacklistMatcher - Plate normalization and blacklist evaluation
//! 6. RecordStore - Persistence sink seam (in-memory ring buffer)
//! 7. WsAdapter - WebSocket transport (registration-gated, per-camera)
//! 8. MqttAdapter - MQTT transport (per-topic QoS, manual acks)
//! 9. WebAPI - REST read endpoints + WebSocket upgrade
//!
//! ## Design Principles
//!
//! - One canonical event stream regardless of delivering transport
//! - Transport adapters only adapt; the core never branches on transport
//! - Dedup commit happens after persistence so redelivery can retry

pub mod alert_log;
pub mod blacklist;
pub mod camera_registry;
pub mod dedup_ledger;
pub mod envelope;
pub mod error;
pub mod event_router;
pub mod ingest;
pub mod models;
pub mod mqtt_adapter;
pub mod record_store;
pub mod state;
pub mod web_api;
pub mod ws_adapter;

pub use error::{Error, Result};
pub use state::AppState;
