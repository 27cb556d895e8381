use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// Broadcast tick period
    pub tick_ms: u64,
    /// Upper bound on disconnecting the old driver during a protocol switch
    pub switch_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct S7Config {
    pub host: String,
    pub port: u16,
    pub rack: u16,
    pub slot: u16,
    pub poll_ms: u64,
    /// Per-transport-call timeout
    pub timeout_ms: u64,
    /// Use the in-process simulator instead of ISO-on-TCP
    pub simulated: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct OpcUaConfig {
    pub endpoint: String,
    pub publishing_ms: u64,
    pub sampling_ms: u64,
    pub queue_size: u32,
    pub timeout_ms: u64,
    /// Use the in-process demo server instead of a client session
    pub simulated: bool,
    pub application_name: String,
    /// Client certificate store
    pub pki_dir: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct BridgeConfig {
    /// Flow engine admin API, e.g. `http://localhost:1881`
    pub url: String,
    /// PLC address baked into generated flows
    pub plc_address: String,
    pub broker_host: String,
    pub broker_port: u16,
    pub topic: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct MqttConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub topic: String,
    pub client_id: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct StorageConfig {
    pub base_tags: String,
    pub overlay_tags: String,
    pub metadata: String,
    pub audit_log: String,
    pub history_log: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub scheduler: SchedulerConfig,
    pub s7: S7Config,
    pub opcua: OpcUaConfig,
    pub bridge: BridgeConfig,
    pub mqtt: MqttConfig,
    pub storage: StorageConfig,
    /// Protocol connected at startup
    pub default_protocol: String,
}

impl GatewayConfig {
    /// Layers: built-in defaults, `<dir>/default`, `<dir>/<RUN_MODE>`, then
    /// `GATEWAY__SECTION__KEY` environment variables.
    pub fn load(config_dir: &str) -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        Self::defaults()?
            .add_source(File::with_name(&format!("{}/default", config_dir)).required(false))
            .add_source(File::with_name(&format!("{}/{}", config_dir, run_mode)).required(false))
            // e.g. GATEWAY__S7__HOST=10.0.0.5
            .add_source(Environment::with_prefix("GATEWAY").separator("__"))
            .build()?
            .try_deserialize()
    }

    /// Built-in defaults only, no files or environment
    pub fn default_settings() -> Result<Self, ConfigError> {
        Self::defaults()?.build()?.try_deserialize()
    }

    fn defaults() -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        Config::builder()
            .set_default("server.bind", "0.0.0.0")?
            .set_default("server.port", 3001)?
            .set_default("scheduler.tick_ms", 1000)?
            .set_default("scheduler.switch_timeout_ms", 5000)?
            .set_default("s7.host", "192.168.103.24")?
            .set_default("s7.port", 102)?
            .set_default("s7.rack", 0)?
            .set_default("s7.slot", 1)?
            .set_default("s7.poll_ms", 1000)?
            .set_default("s7.timeout_ms", 2000)?
            .set_default("s7.simulated", false)?
            .set_default("opcua.endpoint", "opc.tcp://192.168.103.24:4840")?
            .set_default("opcua.publishing_ms", 1000)?
            .set_default("opcua.sampling_ms", 1000)?
            .set_default("opcua.queue_size", 10)?
            .set_default("opcua.timeout_ms", 5000)?
            .set_default("opcua.simulated", false)?
            .set_default("opcua.application_name", "PLC Gateway")?
            .set_default("opcua.pki_dir", "pki")?
            .set_default("bridge.url", "http://localhost:1881")?
            .set_default("bridge.plc_address", "192.168.103.24")?
            .set_default("bridge.broker_host", "localhost")?
            .set_default("bridge.broker_port", 1883)?
            .set_default("bridge.topic", "fuseflow/data")?
            .set_default("mqtt.enabled", true)?
            .set_default("mqtt.host", "broker.hivemq.com")?
            .set_default("mqtt.port", 1883)?
            .set_default("mqtt.topic", "fuseflow/data")?
            .set_default("mqtt.client_id", "plc-gateway")?
            .set_default("storage.base_tags", "data/tags-base.json")?
            .set_default("storage.overlay_tags", "data/tags-new.json")?
            .set_default("storage.metadata", "data/tag-metadata.json")?
            .set_default("storage.audit_log", "data/audit-log.jsonl")?
            .set_default("storage.history_log", "data/history.jsonl")?
            .set_default("default_protocol", "OPC UA")
    }
}
