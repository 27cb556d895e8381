use domain::bridge::BridgeVariable;
use domain::tag::TagTable;
use serde_json::{Value, json};

use crate::drivers::s7::is_foreign;

pub const FLOW_ID: &str = "linqsynq-generated-flow";
pub const PLC_CONFIG_ID: &str = "linqsynq-s7-config";
const BROKER_ID: &str = "mqtt-broker-local";

/// Parameters baked into a generated flow
#[derive(Debug, Clone, PartialEq)]
pub struct FlowSettings {
    pub plc_address: String,
    pub broker_host: String,
    pub broker_port: u16,
    pub topic: String,
}

/// The S7 subset of a tag table; node-id addresses are left out.
pub fn s7_variables(tags: &TagTable) -> Vec<BridgeVariable> {
    tags.iter()
        .filter(|(_, addr)| !is_foreign(addr))
        .map(|(name, addr)| BridgeVariable::new(name, addr))
        .collect()
}

/// Builds the node list deployed to the flow engine: a tab, the PLC endpoint
/// carrying the variable table, a read-all node wired to a debug node and an
/// MQTT publisher, and the broker config.
pub fn build_flow(variables: &[BridgeVariable], settings: &FlowSettings) -> Vec<Value> {
    vec![
        json!({
            "id": FLOW_ID,
            "type": "tab",
            "label": "LinQSynQ Auto-Gen",
            "disabled": false,
            "info": "Automatically generated by the LinQSynQ gateway"
        }),
        json!({
            "id": PLC_CONFIG_ID,
            "type": "s7 endpoint",
            "transport": "iso-on-tcp",
            "address": settings.plc_address,
            "port": "102",
            "rack": "0",
            "slot": "1",
            "vartable": variables,
            "name": "LinQSynQ PLC"
        }),
        json!({
            "id": "s7-read-all",
            "type": "s7 in",
            "z": FLOW_ID,
            "endpoint": PLC_CONFIG_ID,
            "mode": "all",
            "variable": "",
            "diff": true,
            "name": "Read All Tags",
            "x": 200,
            "y": 200,
            "wires": [["debug-node", "mqtt-out-node"]]
        }),
        json!({
            "id": "debug-node",
            "type": "debug",
            "z": FLOW_ID,
            "name": "Debug Output",
            "active": true,
            "tosidebar": true,
            "console": false,
            "tostatus": false,
            "complete": "payload",
            "targetType": "msg",
            "x": 450,
            "y": 200,
            "wires": []
        }),
        json!({
            "id": "mqtt-out-node",
            "type": "mqtt out",
            "z": FLOW_ID,
            "name": "To Gateway",
            "topic": settings.topic,
            "qos": "",
            "retain": "",
            "broker": BROKER_ID,
            "x": 450,
            "y": 300,
            "wires": []
        }),
        json!({
            "id": BROKER_ID,
            "type": "mqtt-broker",
            "name": "Local Broker",
            "broker": settings.broker_host,
            "port": settings.broker_port.to_string(),
            "clientid": "",
            "autoConnect": true,
            "usetls": false,
            "protocolVersion": "4",
            "keepalive": "60",
            "cleansession": true
        }),
    ]
}

/// Collects `{name, addr}` from every `s7 endpoint` node's variable table.
/// Entries missing either field are skipped.
pub fn extract_variables(flows: &[Value]) -> Vec<BridgeVariable> {
    flows
        .iter()
        .filter(|node| node.get("type").and_then(Value::as_str) == Some("s7 endpoint"))
        .filter_map(|node| node.get("vartable").and_then(Value::as_array))
        .flatten()
        .filter_map(|entry| {
            let name = entry.get("name").and_then(Value::as_str)?;
            let addr = entry.get("addr").and_then(Value::as_str)?;
            (!name.is_empty() && !addr.is_empty()).then(|| BridgeVariable::new(name, addr))
        })
        .collect()
}
