//! Application state
//!
//! Holds all shared components and state

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use crate::alert_log::AlertLog;
use crate::blacklist::InMemoryBlacklist;
use crate::camera_registry::{CameraRegistry, OfflineRevivalPolicy};
use crate::dedup_ledger::DedupLedger;
use crate::event_router::EventRouter;
use crate::ingest::IngestPipeline;
use crate::record_store::InMemoryRecordStore;
use crate::ws_adapter::CameraConnections;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Enable the MQTT adapter
    pub mqtt_enabled: bool,
    /// MQTT broker host
    pub mqtt_host: String,
    /// MQTT broker port
    pub mqtt_port: u16,
    /// MQTT client id
    pub mqtt_client_id: String,
    /// Silence before a camera is reported Stale
    pub stale_threshold: Duration,
    /// Silence before a camera is reported Offline
    pub offline_threshold: Duration,
    /// How long committed message ids are remembered
    pub dedup_window: Duration,
    /// How long an uncommitted dedup claim blocks redelivery
    pub dedup_claim_ttl: Duration,
    /// How long the router holds events to reorder late arrivals
    pub lateness_tolerance: Duration,
    /// Record ring buffer capacity
    pub record_capacity: usize,
    /// Alert ring buffer capacity
    pub alert_capacity: usize,
    /// Whether an Offline camera revives on any event or only on
    /// re-registration
    pub offline_revival: OfflineRevivalPolicy,
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            mqtt_enabled: std::env::var("MQTT_ENABLED")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(true),
            mqtt_host: std::env::var("MQTT_HOST").unwrap_or_else(|_| "localhost".to_string()),
            mqtt_port: std::env::var("MQTT_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(1883),
            mqtt_client_id: std::env::var("MQTT_CLIENT_ID")
                .unwrap_or_else(|_| "lprserver-ingest".to_string()),
            stale_threshold: Duration::seconds(env_u64("STALE_THRESHOLD_SEC", 120) as i64),
            offline_threshold: Duration::seconds(env_u64("OFFLINE_THRESHOLD_SEC", 600) as i64),
            dedup_window: Duration::seconds(env_u64("DEDUP_WINDOW_SEC", 3600) as i64),
            dedup_claim_ttl: Duration::seconds(env_u64("DEDUP_CLAIM_TTL_SEC", 30) as i64),
            lateness_tolerance: Duration::seconds(env_u64("LATENESS_TOLERANCE_SEC", 5) as i64),
            record_capacity: env_u64("RECORD_CAPACITY", 10_000) as usize,
            alert_capacity: env_u64("ALERT_CAPACITY", 1_000) as usize,
            offline_revival: OfflineRevivalPolicy::parse(
                &std::env::var("OFFLINE_REVIVAL").unwrap_or_else(|_| "any_event".to_string()),
            ),
        }
    }
}

/// Application state shared across handlers and adapters
#[derive(Clone)]
pub struct AppState {
    /// Application config
    pub config: AppConfig,
    /// Shared ingestion pipeline (all transports)
    pub pipeline: Arc<IngestPipeline>,
    /// Camera lifecycle registry
    pub registry: Arc<CameraRegistry>,
    /// Deduplication ledger
    pub ledger: Arc<DedupLedger>,
    /// Event router (sequencing buffer)
    pub router: Arc<EventRouter>,
    /// In-memory record store (persistence sink + REST reads)
    pub records: Arc<InMemoryRecordStore>,
    /// Blacklist alert log
    pub alerts: Arc<AlertLog>,
    /// Blacklist snapshot
    pub blacklist: Arc<InMemoryBlacklist>,
    /// Active device WebSocket connections
    pub connections: Arc<CameraConnections>,
    /// Server start time (uptime reporting)
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn uptime_sec(&self) -> u64 {
        (Utc::now() - self.started_at).num_seconds().max(0) as u64
    }
}
