use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// One entry of the flow engine's PLC variable table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeVariable {
    pub name: String,
    pub addr: String,
}

impl BridgeVariable {
    pub fn new(name: impl Into<String>, addr: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            addr: addr.into(),
        }
    }
}

/// Port to the external flow engine that owns the PLC connection when the
/// bridge protocol is selected.
#[async_trait]
pub trait FlowBridge: Send + Sync {
    /// Replaces the generated flow with one reading `variables` from `plc_address`.
    async fn deploy(&self, variables: &[BridgeVariable], plc_address: &str)
    -> Result<(), DomainError>;

    /// Every variable of every PLC endpoint in the deployed flows
    async fn export(&self) -> Result<Vec<BridgeVariable>, DomainError>;

    /// Cheap reachability check
    async fn ping(&self) -> Result<(), DomainError>;

    fn url(&self) -> &str;
}
