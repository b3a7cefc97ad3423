//! EventRouter - Ordered Dispatch to Downstream Sinks
//!
//! ## Responsibilities
//!
//! - Dispatch canonical, deduplicated events by data_type to the
//!   persistence store, blacklist matcher, and health tracking
//! - Preserve per-device ordering: a sequencing buffer keyed by device
//!   holds each event up to the lateness tolerance and releases in
//!   non-decreasing timestamp order
//! - Commit the dedup claim only after persistence succeeds; release it
//!   on store failure so transport redelivery retries
//!
//! An event whose timestamp is already behind the device watermark (a
//! later event was already released) is dispatched immediately and
//! flagged OutOfOrder rather than held indefinitely.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};

use crate::alert_log::{AlertEvent, AlertLog};
use crate::blacklist::{self, BlacklistSource};
use crate::camera_registry::CameraRegistry;
use crate::dedup_ledger::DedupLedger;
use crate::envelope::{CanonicalEvent, DataType};
use crate::record_store::{RecordId, RecordStore, StoreError};

/// Result of routing one event through the sinks
#[derive(Debug, Clone)]
pub struct RouteResult {
    pub record_id: RecordId,
    pub out_of_order: bool,
    /// Set when the blacklist matcher fired for a detection
    pub alert: Option<AlertEvent>,
}

/// Resolves once the event has been dispatched (possibly after buffering)
pub type RouteReceiver = oneshot::Receiver<Result<RouteResult, StoreError>>;

struct Pending {
    event: CanonicalEvent,
    enqueued_at: DateTime<Utc>,
    tx: oneshot::Sender<Result<RouteResult, StoreError>>,
}

#[derive(Default)]
struct DeviceBuffer {
    /// Keyed by (event timestamp, arrival seq) so iteration yields
    /// timestamp order with a stable tiebreak
    pending: BTreeMap<(DateTime<Utc>, u64), Pending>,
    /// Highest timestamp already released downstream
    watermark: Option<DateTime<Utc>>,
    seq: u64,
}

/// Event router with a per-device sequencing buffer
pub struct EventRouter {
    store: Arc<dyn RecordStore>,
    registry: Arc<CameraRegistry>,
    blacklist: Arc<dyn BlacklistSource>,
    alerts: Arc<AlertLog>,
    ledger: Arc<DedupLedger>,
    lateness: Duration,
    buffers: DashMap<String, DeviceBuffer>,
    /// Serializes downstream dispatch per device so flushes cannot
    /// interleave and reorder a batch
    dispatch_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl EventRouter {
    pub fn new(
        store: Arc<dyn RecordStore>,
        registry: Arc<CameraRegistry>,
        blacklist: Arc<dyn BlacklistSource>,
        alerts: Arc<AlertLog>,
        ledger: Arc<DedupLedger>,
        lateness: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            blacklist,
            alerts,
            ledger,
            lateness,
            buffers: DashMap::new(),
            dispatch_locks: DashMap::new(),
        }
    }

    /// Submit a deduplicated event for routing. The returned receiver
    /// resolves with the route result once the event clears the
    /// sequencing buffer and the sinks have been applied.
    pub async fn submit(&self, event: CanonicalEvent) -> RouteReceiver {
        let (tx, rx) = oneshot::channel();
        let device = event.envelope.edge_device_id.clone();
        let now = Utc::now();

        // Watermark check and insert happen under one buffer guard so a
        // concurrent flush cannot advance the watermark in between.
        let late = {
            let mut buffer = self.buffers.entry(device.clone()).or_default();
            if matches!(buffer.watermark, Some(w) if event.envelope.timestamp < w) {
                Some((event, tx))
            } else {
                let seq = buffer.seq;
                buffer.seq += 1;
                buffer.pending.insert(
                    (event.envelope.timestamp, seq),
                    Pending {
                        event,
                        enqueued_at: now,
                        tx,
                    },
                );
                None
            }
        };

        if let Some((event, tx)) = late {
            // A later event already went downstream; reordering is no
            // longer possible. Route now, flagged.
            tracing::warn!(
                edge_device_id = %device,
                message_id = %event.envelope.message_id,
                timestamp = %event.envelope.timestamp,
                "Event routed out of order (behind device watermark)"
            );
            let lock = self.dispatch_lock(&device);
            let _guard = lock.lock().await;
            self.dispatch(event, true, tx).await;
            return rx;
        }

        self.flush_device(&device, now).await;
        rx
    }

    /// Release ripe buffered events for one device, in timestamp order.
    /// An event is ripe once it has been buffered for the lateness
    /// tolerance; release stops at the first unripe event so order holds.
    pub async fn flush_device(&self, device: &str, now: DateTime<Utc>) {
        let lock = self.dispatch_lock(device);
        let _guard = lock.lock().await;

        let ripe: Vec<Pending> = {
            let mut buffer = match self.buffers.get_mut(device) {
                Some(b) => b,
                None => return,
            };
            let mut drained = Vec::new();
            while let Some(entry) = buffer.pending.first_entry() {
                if entry.get().enqueued_at + self.lateness > now {
                    break;
                }
                drained.push(entry.remove());
            }
            if let Some(last) = drained.last() {
                let released = last.event.envelope.timestamp;
                // The watermark only moves forward
                buffer.watermark =
                    Some(buffer.watermark.map_or(released, |w| w.max(released)));
            }
            drained
        };

        for pending in ripe {
            self.dispatch(pending.event, false, pending.tx).await;
        }
    }

    /// Flush every device buffer. Driven by a periodic background task.
    pub async fn flush_all(&self, now: DateTime<Utc>) {
        let devices: Vec<String> = self.buffers.iter().map(|e| e.key().clone()).collect();
        for device in devices {
            self.flush_device(&device, now).await;
        }
    }

    /// Events currently held in sequencing buffers
    pub fn buffered_count(&self) -> usize {
        self.buffers.iter().map(|b| b.pending.len()).sum()
    }

    fn dispatch_lock(&self, device: &str) -> Arc<Mutex<()>> {
        self.dispatch_locks
            .entry(device.to_string())
            .or_default()
            .clone()
    }

    /// Apply one event to the sinks: store, then dedup commit, then the
    /// type-specific consumers. Partial failures after the store are
    /// logged, never rolled back.
    async fn dispatch(
        &self,
        event: CanonicalEvent,
        out_of_order: bool,
        tx: oneshot::Sender<Result<RouteResult, StoreError>>,
    ) {
        let device = event.envelope.edge_device_id.clone();
        let message_id = event.envelope.message_id.clone();

        let record_id = match self.store.store(&event).await {
            Ok(id) => id,
            Err(e) => {
                // Not committed: redelivery over a retry-capable
                // transport will run the pipeline again.
                self.ledger.release(&device, &message_id);
                tracing::error!(
                    edge_device_id = %device,
                    message_id = %message_id,
                    error = %e,
                    "Persistence failed, dedup claim released for retry"
                );
                let _ = tx.send(Err(e));
                return;
            }
        };

        self.ledger.commit(&device, &message_id, Utc::now());

        let mut alert = None;
        match event.envelope.data_type {
            DataType::Detection => match event.envelope.detection_payload() {
                Ok(payload) => {
                    let snapshot = self.blacklist.current_snapshot().await;
                    if let Some(hit) = blacklist::evaluate(&payload, &snapshot) {
                        let mut alert_event = AlertEvent {
                            alert_id: 0,
                            camera_id: device.clone(),
                            plate: payload.plate.clone(),
                            normalized_plate: hit.normalized_plate,
                            matched_pattern: hit.matched_pattern,
                            reason: hit.reason,
                            detected_at: event.envelope.timestamp,
                            created_at: Utc::now(),
                        };
                        alert_event.alert_id = self.alerts.push(alert_event.clone()).await;
                        tracing::warn!(
                            camera_id = %device,
                            plate = %payload.plate,
                            pattern = %alert_event.matched_pattern,
                            reason = %alert_event.reason,
                            "Blacklist match"
                        );
                        alert = Some(alert_event);
                    }
                }
                Err(e) => {
                    // Payload passed schema validation at decode; reaching
                    // here indicates a codec/schema drift worth surfacing.
                    tracing::error!(
                        edge_device_id = %device,
                        message_id = %message_id,
                        error = %e,
                        "Stored detection payload failed typed parse"
                    );
                }
            },
            DataType::Health => {
                if let Ok(payload) = event.envelope.health_payload() {
                    self.registry
                        .record_health(&device, payload, event.received_at);
                }
            }
            DataType::Config | DataType::Control | DataType::Registration => {}
        }

        tracing::debug!(
            edge_device_id = %device,
            message_id = %message_id,
            record_id = record_id,
            data_type = %event.envelope.data_type,
            out_of_order = out_of_order,
            "Event routed"
        );

        let _ = tx.send(Ok(RouteResult {
            record_id,
            out_of_order,
            alert,
        }));
    }
}
