//! MqttAdapter - MQTT Transport Adapter
//!
//! ## Responsibilities
//!
//! - Subscribe to the per-camera wildcard topics at their channel QoS
//! - Feed received payloads into the shared ingestion pipeline
//! - Manual acks: the transport delivery is acknowledged only when the
//!   pipeline reached a terminal state (applied, duplicate, or
//!   unfixably malformed); persistence failures withhold the ack so the
//!   broker redelivers
//! - Reconnect with capped exponential backoff; subscriptions are
//!   re-established on every reconnect
//!
//! Retained config/control messages arrive on (re)subscribe like any
//! other publish; the dedup ledger decides whether they are new.

mod topic;

pub use topic::{parse_topic, qos_for_channel, ParsedTopic, TopicError};

use rumqttc::{AsyncClient, Event, MqttOptions, Packet, Publish};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::envelope::{DataType, Transport};
use crate::ingest::{IngestOutcome, IngestPipeline};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// MQTT adapter configuration
#[derive(Debug, Clone)]
pub struct MqttAdapterConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
}

/// Run the MQTT adapter until the shutdown token fires.
///
/// Connection errors never propagate; the adapter reconnects with
/// backoff and the core's state survives across sessions.
pub async fn run_mqtt_adapter(
    config: MqttAdapterConfig,
    pipeline: Arc<IngestPipeline>,
    shutdown: CancellationToken,
) {
    tracing::info!(
        host = %config.host,
        port = config.port,
        client_id = %config.client_id,
        "Starting MQTT adapter"
    );

    let mut backoff = INITIAL_BACKOFF;

    loop {
        if shutdown.is_cancelled() {
            break;
        }

        match run_mqtt_session(&config, Arc::clone(&pipeline), &shutdown).await {
            Ok(()) => {
                tracing::info!("MQTT adapter stopped cleanly");
                break;
            }
            Err(e) => {
                tracing::error!(error = %e, "MQTT session error");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }

    tracing::info!("MQTT adapter stopped");
}

/// One broker session: connect, subscribe, pump the event loop.
async fn run_mqtt_session(
    config: &MqttAdapterConfig,
    pipeline: Arc<IngestPipeline>,
    shutdown: &CancellationToken,
) -> Result<(), rumqttc::ConnectionError> {
    let mut mqtt_options = MqttOptions::new(&config.client_id, &config.host, config.port);
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    // Persistent session so the broker redelivers QoS 1/2 messages
    // missed while disconnected
    mqtt_options.set_clean_session(false);
    mqtt_options.set_manual_acks(true);

    let (client, mut eventloop) = AsyncClient::new(mqtt_options, 100);

    for channel in [
        DataType::Detection,
        DataType::Health,
        DataType::Config,
        DataType::Control,
    ] {
        let filter = format!("lprserver/cameras/+/{}", channel);
        if let Err(e) = client.subscribe(&filter, qos_for_channel(channel)).await {
            tracing::error!(filter = %filter, error = %e, "MQTT subscribe failed");
        } else {
            tracing::info!(filter = %filter, qos = ?qos_for_channel(channel), "Subscribed to MQTT topic");
        }
    }

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = client.disconnect().await;
                return Ok(());
            }
            event = eventloop.poll() => {
                match event {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        spawn_publish_handler(&client, Arc::clone(&pipeline), publish);
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        tracing::info!("Connected to MQTT broker");
                    }
                    Ok(Event::Incoming(Packet::SubAck(_))) => {
                        tracing::debug!("MQTT subscription acknowledged");
                    }
                    Ok(_) => {}
                    Err(e) => return Err(e),
                }
            }
        }
    }
}

/// Hand one publish to the pipeline on its own task. The pipeline can
/// hold an event in the sequencing buffer for the lateness tolerance,
/// and the poll loop must keep servicing keep-alives and inflight
/// messages in the meantime. Manual acks make this safe: the task acks
/// through a cloned client handle once the pipeline resolves.
fn spawn_publish_handler(client: &AsyncClient, pipeline: Arc<IngestPipeline>, publish: Publish) {
    let client = client.clone();
    tokio::spawn(async move {
        handle_publish(&client, pipeline, publish).await;
    });
}

/// Handle one inbound publish: parse the topic, run the pipeline, and
/// ack only terminal outcomes.
async fn handle_publish(client: &AsyncClient, pipeline: Arc<IngestPipeline>, publish: Publish) {
    let parsed = match parse_topic(&publish.topic) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(topic = %publish.topic, error = %e, "Unparseable MQTT topic, dropping");
            // Redelivery cannot fix the topic; complete the delivery
            ack(client, &publish).await;
            return;
        }
    };

    if publish.retain {
        tracing::debug!(
            topic = %publish.topic,
            camera_id = %parsed.camera_id,
            "Retained message delivered on (re)subscribe"
        );
    }

    let outcome = pipeline.ingest(Transport::Mqtt, &publish.payload).await;

    if let IngestOutcome::Accepted(ref result) = outcome {
        tracing::debug!(
            topic = %publish.topic,
            camera_id = %parsed.camera_id,
            record_id = result.record_id,
            "MQTT event applied"
        );
    }

    if should_ack(&outcome) {
        ack(client, &publish).await;
    } else {
        tracing::warn!(
            topic = %publish.topic,
            camera_id = %parsed.camera_id,
            "Ack withheld, broker will redeliver"
        );
    }
}

/// Whether the transport delivery is complete. Applied events,
/// duplicates, and unfixably malformed input are acked; persistence
/// failures and in-flight races are not, so the broker retries.
fn should_ack(outcome: &IngestOutcome) -> bool {
    match outcome {
        IngestOutcome::Accepted(_) | IngestOutcome::Duplicate | IngestOutcome::Rejected(_) => true,
        IngestOutcome::StoreFailed(_) | IngestOutcome::InFlight => false,
    }
}

async fn ack(client: &AsyncClient, publish: &Publish) {
    // No-op for QoS 0
    if let Err(e) = client.ack(publish).await {
        tracing::error!(topic = %publish.topic, error = %e, "MQTT ack failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert_log::AlertLog;
    use crate::blacklist::InMemoryBlacklist;
    use crate::camera_registry::{CameraRegistry, OfflineRevivalPolicy};
    use crate::dedup_ledger::DedupLedger;
    use crate::envelope::DecodeError;
    use crate::event_router::{EventRouter, RouteResult};
    use crate::record_store::{InMemoryRecordStore, StoreError};
    use chrono::{Duration as Lateness, Utc};
    use rumqttc::QoS;
    use serde_json::json;

    fn pipeline_stack(
        lateness: Lateness,
    ) -> (Arc<IngestPipeline>, Arc<EventRouter>, Arc<InMemoryRecordStore>) {
        let store = Arc::new(InMemoryRecordStore::new(100));
        let ledger = Arc::new(DedupLedger::new(Lateness::hours(1), Lateness::seconds(30)));
        let registry = Arc::new(CameraRegistry::new(
            Lateness::seconds(120),
            Lateness::seconds(600),
            OfflineRevivalPolicy::AnyEvent,
        ));
        let router = Arc::new(EventRouter::new(
            store.clone(),
            registry.clone(),
            Arc::new(InMemoryBlacklist::new()),
            Arc::new(AlertLog::new(100)),
            ledger.clone(),
            lateness,
        ));
        (
            Arc::new(IngestPipeline::new(ledger, registry, router.clone())),
            router,
            store,
        )
    }

    #[tokio::test]
    async fn test_publish_handled_off_the_caller() {
        let (pipeline, router, store) = pipeline_stack(Lateness::seconds(5));
        let (client, _eventloop) =
            AsyncClient::new(MqttOptions::new("test-client", "localhost", 1883), 10);

        let payload = serde_json::to_vec(&json!({
            "message_id": "m1",
            "timestamp": "2026-08-26T10:00:00Z",
            "edge_device_id": "CAM1",
            "data_type": "detection",
            "payload": {"plate": "ABC123", "confidence": 0.9}
        }))
        .unwrap();
        let publish = Publish::new(
            "lprserver/cameras/CAM1/detection",
            QoS::AtLeastOnce,
            payload,
        );

        // Returns immediately; only the spawned task waits out the
        // sequencing buffer
        spawn_publish_handler(&client, pipeline, publish);

        let mut buffered = 0;
        for _ in 0..100 {
            buffered = router.buffered_count();
            if buffered == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(buffered, 1);
        assert_eq!(store.count().await, 0);

        router.flush_all(Utc::now() + Lateness::seconds(10)).await;
        assert_eq!(store.count().await, 1);
    }

    #[test]
    fn test_should_ack_terminal_outcomes() {
        assert!(should_ack(&IngestOutcome::Accepted(RouteResult {
            record_id: 1,
            out_of_order: false,
            alert: None,
        })));
        assert!(should_ack(&IngestOutcome::Duplicate));
        assert!(should_ack(&IngestOutcome::Rejected(
            DecodeError::MissingField("data_type")
        )));
    }

    #[test]
    fn test_should_not_ack_retryable_outcomes() {
        assert!(!should_ack(&IngestOutcome::StoreFailed(
            StoreError::Unavailable("down".to_string())
        )));
        assert!(!should_ack(&IngestOutcome::InFlight));
    }
}
