use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::DomainError;
use domain::coercion::WireValue;
use serde_json::Value;
use tokio::sync::mpsc;

use super::NodeId;

/// Requested subscription parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionParams {
    pub publishing_interval_ms: u64,
    pub sampling_interval_ms: u64,
    pub queue_size: u32,
}

/// A value change pushed by the server for one monitored item.
#[derive(Debug, Clone, PartialEq)]
pub struct DataChange {
    /// Client handle given when the item was created; the tag name
    pub handle: String,
    pub value: Value,
    /// Status code name, e.g. `Good`, `BadNodeIdUnknown`
    pub status: String,
    pub source_timestamp: Option<DateTime<Utc>>,
}

/// Result of reading a node's Value attribute
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRead {
    pub value: Value,
    /// Built-in DataType id of the value
    pub type_id: u32,
    pub status: String,
}

/// Lower-level OPC UA client session. Secure channel and session handling
/// live behind this trait.
#[async_trait]
pub trait OpcUaTransport: Send + Sync {
    async fn connect(&self, endpoint: &str) -> Result<(), DomainError>;

    async fn disconnect(&self) -> Result<(), DomainError>;

    /// Creates a subscription whose notifications go to `sink`.
    async fn create_subscription(
        &self,
        params: SubscriptionParams,
        sink: mpsc::Sender<DataChange>,
    ) -> Result<u32, DomainError>;

    async fn delete_subscription(&self, subscription_id: u32) -> Result<(), DomainError>;

    /// Adds a monitored item and returns its server-side id.
    async fn monitor(
        &self,
        subscription_id: u32,
        node: &NodeId,
        handle: &str,
    ) -> Result<u32, DomainError>;

    async fn unmonitor(&self, subscription_id: u32, item_id: u32) -> Result<(), DomainError>;

    async fn read(&self, node: &NodeId) -> Result<NodeRead, DomainError>;

    /// Writes `value` encoded as `type_id`.
    async fn write(&self, node: &NodeId, type_id: u32, value: &WireValue)
    -> Result<(), DomainError>;
}
