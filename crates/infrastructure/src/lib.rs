//! Infrastructure layer - protocol drivers, persistence and external integrations

pub mod bridge;
pub mod config;
pub mod drivers;
pub mod messaging;
pub mod storage;

pub use bridge::NodeRedClient;
pub use config::GatewayConfig;
pub use drivers::DriverFactory;
pub use messaging::{BrokerAddress, MqttClient, MqttTelemetry};
pub use storage::{JsonTagStore, JsonlAuditLog, JsonlHistorySink};
