use serde::{Deserialize, Serialize};

mod sink;
pub use sink::{AuditSink, SnapshotSink};

use crate::driver::Protocol;
use crate::tag::Snapshot;

/// Driver status as seen by live subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlcStatus {
    pub connected: bool,
    pub protocol: Protocol,
}

/// Telemetry link status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkStatus {
    pub connected: bool,
}

/// Events pushed to live subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    PlcStatus(PlcStatus),
    /// Flat `{tag: value}` map, tag order preserved
    PlcData(Snapshot),
    MqttStatus(LinkStatus),
}

impl GatewayEvent {
    pub fn plc_status(connected: bool, protocol: Protocol) -> Self {
        Self::PlcStatus(PlcStatus {
            connected,
            protocol,
        })
    }

    pub fn mqtt_status(connected: bool) -> Self {
        Self::MqttStatus(LinkStatus { connected })
    }

    /// Event name on the wire
    pub fn name(&self) -> &'static str {
        match self {
            Self::PlcStatus(_) => "plc-status",
            Self::PlcData(_) => "plc-data",
            Self::MqttStatus(_) => "mqtt-status",
        }
    }

    pub fn payload(&self) -> serde_json::Value {
        match self {
            Self::PlcStatus(status) => serde_json::json!({
                "connected": status.connected,
                "protocol": status.protocol,
            }),
            Self::PlcData(snapshot) => serde_json::Value::Object(snapshot.clone()),
            Self::MqttStatus(status) => serde_json::json!({ "connected": status.connected }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_names() {
        assert_eq!(GatewayEvent::plc_status(true, Protocol::S7).name(), "plc-status");
        assert_eq!(GatewayEvent::PlcData(Snapshot::new()).name(), "plc-data");
        assert_eq!(GatewayEvent::mqtt_status(false).name(), "mqtt-status");
    }

    #[test]
    fn test_status_payload() {
        let event = GatewayEvent::plc_status(false, Protocol::OpcUa);
        assert_eq!(
            event.payload(),
            json!({"connected": false, "protocol": "OPC UA"})
        );
    }

    #[test]
    fn test_data_payload_keeps_order() {
        let mut snapshot = Snapshot::new();
        snapshot.insert("Zeta".into(), json!(1));
        snapshot.insert("Alpha".into(), json!(2));
        let payload = GatewayEvent::PlcData(snapshot).payload();
        let keys: Vec<_> = payload.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["Zeta", "Alpha"]);
    }
}
