//! LPR Ingestion Server
//!
//! Main entry point. Wires the ingestion pipeline, starts the
//! background sweeps and the MQTT adapter, and serves the web API.

use lprserver::{
    alert_log::AlertLog,
    blacklist::InMemoryBlacklist,
    camera_registry::CameraRegistry,
    dedup_ledger::DedupLedger,
    event_router::EventRouter,
    ingest::IngestPipeline,
    mqtt_adapter::{run_mqtt_adapter, MqttAdapterConfig},
    record_store::InMemoryRecordStore,
    state::{AppConfig, AppState},
    web_api,
    ws_adapter::CameraConnections,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lprserver=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting LPR ingestion server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::default();
    tracing::info!(
        host = %config.host,
        port = config.port,
        mqtt_enabled = config.mqtt_enabled,
        stale_threshold_sec = config.stale_threshold.num_seconds(),
        offline_threshold_sec = config.offline_threshold.num_seconds(),
        dedup_window_sec = config.dedup_window.num_seconds(),
        lateness_tolerance_sec = config.lateness_tolerance.num_seconds(),
        offline_revival = ?config.offline_revival,
        "Configuration loaded"
    );

    // Initialize components
    let records = Arc::new(InMemoryRecordStore::new(config.record_capacity));
    let alerts = Arc::new(AlertLog::new(config.alert_capacity));
    let blacklist = Arc::new(InMemoryBlacklist::new());
    let ledger = Arc::new(DedupLedger::new(config.dedup_window, config.dedup_claim_ttl));
    let registry = Arc::new(CameraRegistry::new(
        config.stale_threshold,
        config.offline_threshold,
        config.offline_revival,
    ));
    tracing::info!("DedupLedger and CameraRegistry initialized");

    let router = Arc::new(EventRouter::new(
        records.clone(),
        registry.clone(),
        blacklist.clone(),
        alerts.clone(),
        ledger.clone(),
        config.lateness_tolerance,
    ));
    let pipeline = Arc::new(IngestPipeline::new(
        ledger.clone(),
        registry.clone(),
        router.clone(),
    ));
    tracing::info!("EventRouter and IngestPipeline initialized");

    let connections = Arc::new(CameraConnections::new());

    // Create application state
    let state = AppState {
        config: config.clone(),
        pipeline: pipeline.clone(),
        registry: registry.clone(),
        ledger: ledger.clone(),
        router: router.clone(),
        records,
        alerts,
        blacklist,
        connections,
        started_at: Utc::now(),
    };

    let shutdown = CancellationToken::new();

    // Start router flush task (releases sequenced events)
    let flush_router = router.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        loop {
            interval.tick().await;
            flush_router.flush_all(Utc::now()).await;
        }
    });

    // Start dedup eviction sweep
    let sweep_ledger = ledger.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            sweep_ledger.sweep(Utc::now());
        }
    });

    // Start registry stale/offline sweep
    let sweep_registry = registry.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(10));
        loop {
            interval.tick().await;
            sweep_registry.sweep(Utc::now());
        }
    });
    tracing::info!("Background sweeps started (router flush, dedup eviction, registry)");

    // Start MQTT adapter
    if config.mqtt_enabled {
        let mqtt_config = MqttAdapterConfig {
            host: config.mqtt_host.clone(),
            port: config.mqtt_port,
            client_id: config.mqtt_client_id.clone(),
        };
        let mqtt_pipeline = pipeline.clone();
        let mqtt_shutdown = shutdown.clone();
        tokio::spawn(async move {
            run_mqtt_adapter(mqtt_config, mqtt_pipeline, mqtt_shutdown).await;
        });
    } else {
        tracing::info!("MQTT adapter disabled (set MQTT_ENABLED=true to enable)");
    }

    // Cancel adapters on Ctrl-C
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
            signal_shutdown.cancel();
        }
    });

    // Create router
    let app = web_api::create_router(state.clone())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}
