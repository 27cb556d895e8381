pub mod mqtt_client;
pub mod telemetry;

pub use mqtt_client::{BrokerAddress, MqttClient, MqttPublisherClient};
pub use telemetry::{MqttTelemetry, TelemetryStatus};
