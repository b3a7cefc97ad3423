//! IngestPipeline - Transport-Agnostic Ingestion
//!
//! ## Responsibilities
//!
//! - One pipeline for every transport: decode → dedup claim → registry
//!   update → ordered routing → dedup commit
//! - Map the result to an `IngestOutcome` each adapter translates into
//!   its own ack vocabulary
//!
//! The core never branches on transport identity; adapters only differ
//! in how they deliver bytes in and acknowledgments out.

use chrono::Utc;
use std::sync::Arc;

use crate::camera_registry::CameraRegistry;
use crate::dedup_ledger::{Claim, DedupLedger};
use crate::envelope::{self, DataType, DecodeError, Envelope, Transport};
use crate::event_router::{EventRouter, RouteResult};
use crate::record_store::StoreError;

/// Outcome of ingesting one raw message
#[derive(Debug)]
pub enum IngestOutcome {
    /// Event applied; carries the route result (record id, ordering
    /// flag, optional alert)
    Accepted(RouteResult),
    /// Already applied (same device + message_id); absorb and complete
    /// the transport handshake so retries stop
    Duplicate,
    /// A concurrent delivery of the same message is mid-pipeline; drop
    /// without acking so the transport retries if that attempt fails
    InFlight,
    /// Malformed input; drop, log, and ack (redelivery cannot fix it)
    Rejected(DecodeError),
    /// Persistence failed; do NOT ack retry-capable transports
    StoreFailed(StoreError),
}

/// Shared ingestion pipeline
pub struct IngestPipeline {
    ledger: Arc<DedupLedger>,
    registry: Arc<CameraRegistry>,
    router: Arc<EventRouter>,
}

impl IngestPipeline {
    pub fn new(
        ledger: Arc<DedupLedger>,
        registry: Arc<CameraRegistry>,
        router: Arc<EventRouter>,
    ) -> Self {
        Self {
            ledger,
            registry,
            router,
        }
    }

    /// Decode and ingest raw bytes from a transport adapter.
    pub async fn ingest(&self, transport: Transport, raw: &[u8]) -> IngestOutcome {
        let envelope = match envelope::decode(transport, raw) {
            Ok(env) => env,
            Err(e) => {
                tracing::warn!(
                    transport = %transport,
                    error = %e,
                    "Dropping undecodable message"
                );
                return IngestOutcome::Rejected(e);
            }
        };
        self.ingest_envelope(transport, envelope).await
    }

    /// Ingest an already-decoded envelope (used by adapters that must
    /// inspect the envelope before admission, e.g. the WebSocket
    /// registration gate).
    pub async fn ingest_envelope(&self, transport: Transport, envelope: Envelope) -> IngestOutcome {
        let received_at = Utc::now();
        let device = envelope.edge_device_id.clone();
        let message_id = envelope.message_id.clone();

        match self.ledger.claim(&device, &message_id, received_at) {
            Claim::Duplicate => {
                tracing::debug!(
                    transport = %transport,
                    edge_device_id = %device,
                    message_id = %message_id,
                    "Duplicate delivery absorbed"
                );
                return IngestOutcome::Duplicate;
            }
            Claim::InFlight => {
                tracing::debug!(
                    transport = %transport,
                    edge_device_id = %device,
                    message_id = %message_id,
                    "Concurrent delivery in flight, dropping"
                );
                return IngestOutcome::InFlight;
            }
            Claim::Fresh => {}
        }

        // Registry update happens at intake; it is applied independently
        // of persistence and reported, never rolled back, on partial
        // failure.
        match envelope.data_type {
            DataType::Registration => match envelope.registration_payload() {
                Ok(reg) => {
                    if reg.camera_id != device {
                        tracing::warn!(
                            edge_device_id = %device,
                            payload_camera_id = %reg.camera_id,
                            "Registration payload camera_id differs from envelope device id"
                        );
                    }
                    self.registry
                        .record_registration(&device, &reg.checkpoint_id, received_at);
                }
                Err(e) => {
                    self.ledger.release(&device, &message_id);
                    return IngestOutcome::Rejected(e);
                }
            },
            _ => {
                self.registry.record_event(&device, received_at);
            }
        }

        let rx = self
            .router
            .submit(envelope.into_canonical(transport, received_at))
            .await;

        match rx.await {
            Ok(Ok(result)) => IngestOutcome::Accepted(result),
            Ok(Err(store_err)) => IngestOutcome::StoreFailed(store_err),
            Err(_) => {
                // Router dropped the sender; treat as a transient fault
                // so the transport retries.
                self.ledger.release(&device, &message_id);
                IngestOutcome::StoreFailed(StoreError::Unavailable(
                    "router dropped event before dispatch".to_string(),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert_log::AlertLog;
    use crate::blacklist::InMemoryBlacklist;
    use crate::camera_registry::{ConnectivityState, OfflineRevivalPolicy};
    use crate::record_store::InMemoryRecordStore;
    use chrono::Duration;
    use serde_json::json;

    fn pipeline() -> (IngestPipeline, Arc<InMemoryRecordStore>) {
        let store = Arc::new(InMemoryRecordStore::new(100));
        let registry = Arc::new(CameraRegistry::new(
            Duration::seconds(120),
            Duration::seconds(600),
            OfflineRevivalPolicy::AnyEvent,
        ));
        let ledger = Arc::new(DedupLedger::new(Duration::hours(1), Duration::seconds(30)));
        let router = Arc::new(EventRouter::new(
            store.clone(),
            registry.clone(),
            Arc::new(InMemoryBlacklist::new()),
            Arc::new(AlertLog::new(100)),
            ledger.clone(),
            Duration::zero(),
        ));
        (IngestPipeline::new(ledger, registry, router), store)
    }

    fn raw_detection(message_id: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "message_id": message_id,
            "timestamp": "2026-08-26T10:00:00Z",
            "edge_device_id": "CAM1",
            "data_type": "detection",
            "payload": {"plate": "XYZ999", "confidence": 0.9}
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_ingest_twice_stores_once() {
        let (pipeline, store) = pipeline();
        let raw = raw_detection("m1");

        assert!(matches!(
            pipeline.ingest(Transport::WebSocket, &raw).await,
            IngestOutcome::Accepted(_)
        ));
        assert!(matches!(
            pipeline.ingest(Transport::WebSocket, &raw).await,
            IngestOutcome::Duplicate
        ));
        assert_eq!(store.count().await, 1);
    }

    #[tokio::test]
    async fn test_cross_transport_dedup() {
        let (pipeline, store) = pipeline();
        let raw = raw_detection("m1");

        assert!(matches!(
            pipeline.ingest(Transport::WebSocket, &raw).await,
            IngestOutcome::Accepted(_)
        ));
        assert!(matches!(
            pipeline.ingest(Transport::Mqtt, &raw).await,
            IngestOutcome::Duplicate
        ));
        assert_eq!(store.count().await, 1);
    }

    #[tokio::test]
    async fn test_malformed_input_has_no_side_effects() {
        let (pipeline, store) = pipeline();
        let raw = serde_json::to_vec(&json!({
            "message_id": "m1",
            "timestamp": "2026-08-26T10:00:00Z",
            "edge_device_id": "CAM1",
            "payload": {}
        }))
        .unwrap();

        let outcome = pipeline.ingest(Transport::Mqtt, &raw).await;
        assert!(matches!(
            outcome,
            IngestOutcome::Rejected(DecodeError::MissingField("data_type"))
        ));
        assert_eq!(store.count().await, 0);
        assert_eq!(pipeline.registry.count(), 0);
        assert!(pipeline.ledger.is_empty());
    }

    #[tokio::test]
    async fn test_registration_updates_registry() {
        let (pipeline, _) = pipeline();
        let raw = serde_json::to_vec(&json!({
            "message_id": "m-reg",
            "timestamp": "2026-08-26T09:00:00Z",
            "edge_device_id": "CAM1",
            "data_type": "registration",
            "payload": {"camera_id": "CAM1", "checkpoint_id": "CP1"}
        }))
        .unwrap();

        assert!(matches!(
            pipeline.ingest(Transport::WebSocket, &raw).await,
            IngestOutcome::Accepted(_)
        ));
        let cam = pipeline.registry.get("CAM1").unwrap();
        assert_eq!(cam.state, ConnectivityState::Registered);
        assert_eq!(cam.checkpoint_id.as_deref(), Some("CP1"));
    }

    #[tokio::test]
    async fn test_unknown_device_detection_still_accepted() {
        let (pipeline, store) = pipeline();
        let outcome = pipeline
            .ingest(Transport::Mqtt, &raw_detection("m1"))
            .await;
        assert!(matches!(outcome, IngestOutcome::Accepted(_)));
        assert_eq!(store.count().await, 1);
        let cam = pipeline.registry.get("CAM1").unwrap();
        assert!(!cam.registered);
        assert_eq!(cam.state, ConnectivityState::Online);
    }
}
