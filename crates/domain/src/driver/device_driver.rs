use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

use super::{ConnectionState, Protocol};
use crate::coercion::WireType;
use crate::error::DomainError;
use crate::tag::{RawSnapshot, TagTable};

/// How a driver keeps its cache fresh. Declared by the driver, never inferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AcquisitionMode {
    /// A driver-owned task reads every registered tag on an interval
    Poll,
    /// The server pushes data changes into the cache
    Push,
    /// The driver holds no live values (flow-engine bridge)
    Passive,
}

/// Read-only description of a driver session, for status reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionInfo {
    pub protocol: Protocol,
    pub target: Option<String>,
    pub connected: bool,
    pub state: ConnectionState,
    pub acquisition: AcquisitionMode,
    pub tag_count: usize,
    /// Protocol-specific extras (rack/slot, subscription id, flow url, ...)
    pub details: Map<String, Value>,
}

/// Result of a successful write.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WriteOutcome {
    pub tag: String,
    /// The coerced value as it went on the wire
    pub value: Value,
    pub wire_type: WireType,
}

/// Protocol-agnostic driver port.
///
/// Every method takes `&self`: drivers keep their session behind interior
/// mutability so that status reads never wait on a transport call.
#[async_trait]
pub trait DeviceDriver: Send + Sync {
    fn protocol(&self) -> Protocol;

    fn acquisition(&self) -> AcquisitionMode;

    fn connection_state(&self) -> ConnectionState;

    fn is_connected(&self) -> bool {
        self.connection_state().is_connected()
    }

    /// Opens a session. `None` reuses the last (or configured) target.
    /// A failure leaves the driver Disconnected.
    async fn connect(&self, target: Option<&str>) -> Result<(), DomainError>;

    /// Cancels the background task, waits for it, closes the session.
    /// Calling it on a disconnected driver is a no-op.
    async fn disconnect(&self) -> Result<(), DomainError>;

    /// Merges `tags` into the driver's tag set.
    async fn update_tag_set(&self, tags: &TagTable) -> Result<(), DomainError>;

    /// Releases any per-tag handle and drops the cached value
    async fn remove_tag(&self, name: &str) -> Result<(), DomainError>;

    /// Coerces `raw` to the tag's wire type and writes it.
    async fn write(&self, name: &str, raw: &Value) -> Result<WriteOutcome, DomainError>;

    /// Ordered copy of the value cache
    fn snapshot(&self) -> RawSnapshot;

    fn describe_connection(&self) -> ConnectionInfo;
}
