use serde::{Deserialize, Serialize};

/// Field protocol a driver speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    #[serde(rename = "Snap7")]
    S7,
    #[serde(rename = "OPC UA")]
    OpcUa,
    #[serde(rename = "Node-RED")]
    FlowBridge,
}

impl Protocol {
    pub const ALL: [Protocol; 3] = [Protocol::S7, Protocol::OpcUa, Protocol::FlowBridge];

    /// Display name, also what status reports carry
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::S7 => "Snap7",
            Self::OpcUa => "OPC UA",
            Self::FlowBridge => "Node-RED",
        }
    }

    /// Resolves a free-form protocol name from a connect request.
    ///
    /// Anything that does not mention S7 or the flow engine falls back to OPC UA.
    pub fn from_request(name: &str) -> Self {
        let lowered = name.to_ascii_lowercase();
        if lowered.contains("s7") || lowered.contains("snap7") {
            Self::S7
        } else if lowered.contains("node-red")
            || lowered.contains("nodered")
            || lowered.contains("bridge")
        {
            Self::FlowBridge
        } else {
            Self::OpcUa
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
