use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use application::{
    Broadcaster, DriverRouter, GatewayService, LiveHub, Scheduler, TagRegistry,
};
use domain::driver::Protocol;
use infrastructure::drivers::{DriverFactory, OpcUaTransport, S7Transport};
use infrastructure::{
    GatewayConfig, JsonTagStore, JsonlAuditLog, JsonlHistorySink, MqttTelemetry, NodeRedClient,
};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Everything the HTTP handlers and the background tasks share.
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub service: Arc<GatewayService>,
    pub hub: Arc<LiveHub>,
    pub scheduler: Arc<Scheduler>,
    pub audit: Arc<JsonlAuditLog>,
    pub history: Arc<JsonlHistorySink>,
    /// Fired once on shutdown; stops the scheduler and ends event streams
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Wires the gateway over the transports `s7.simulated` and
    /// `opcua.simulated` select.
    pub async fn build(config: GatewayConfig) -> Result<Arc<Self>> {
        let s7 = DriverFactory::s7_transport(&config.s7);
        let opcua = DriverFactory::opcua_transport(&config.opcua);
        Self::build_with(config, s7, opcua).await
    }

    pub async fn build_with(
        config: GatewayConfig,
        s7: Arc<dyn S7Transport>,
        opcua: Arc<dyn OpcUaTransport>,
    ) -> Result<Arc<Self>> {
        let config = Arc::new(config);
        let storage = &config.storage;

        let store = Arc::new(JsonTagStore::new(
            &storage.base_tags,
            &storage.overlay_tags,
            &storage.metadata,
        ));
        let registry = Arc::new(
            TagRegistry::load(store)
                .await
                .context("Failed to load tag tables")?,
        );
        info!(tags = registry.effective().len(), "Tag registry loaded");

        let bridge = Arc::new(NodeRedClient::new(&config.bridge));
        let drivers = DriverFactory::create_all(&config, s7, opcua, bridge.clone());
        let initial = Protocol::from_request(&config.default_protocol);
        let router = Arc::new(
            DriverRouter::new(
                drivers,
                initial,
                Duration::from_millis(config.scheduler.switch_timeout_ms),
            )
            .context("Failed to build driver router")?,
        );

        let hub = Arc::new(LiveHub::new(initial));
        let telemetry = Arc::new(MqttTelemetry::new(
            config.mqtt.client_id.clone(),
            config.mqtt.topic.clone(),
        ));
        let history = Arc::new(JsonlHistorySink::new(&storage.history_log));
        let audit = Arc::new(JsonlAuditLog::new(&storage.audit_log));

        let broadcaster = Arc::new(
            Broadcaster::new(hub.clone())
                .with_sink(telemetry.clone())
                .with_sink(history.clone()),
        );
        let scheduler = Arc::new(
            Scheduler::new(
                router.clone(),
                broadcaster,
                Duration::from_millis(config.scheduler.tick_ms),
            )
            .with_telemetry(telemetry.clone()),
        );

        let service = Arc::new(GatewayService::new(
            config.clone(),
            registry,
            router,
            bridge,
            telemetry,
            audit.clone(),
        ));

        Ok(Arc::new(Self {
            config,
            service,
            hub,
            scheduler,
            audit,
            history,
            shutdown: CancellationToken::new(),
        }))
    }
}
