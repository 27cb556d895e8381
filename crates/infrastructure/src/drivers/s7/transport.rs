use async_trait::async_trait;
use domain::DomainError;
use domain::coercion::WireValue;
use serde_json::Value;

use super::S7Address;

/// Where an S7 session goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S7Endpoint {
    pub host: String,
    pub port: u16,
    pub rack: u16,
    pub slot: u16,
}

/// A registered read item: tag name plus parsed address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S7Item {
    pub name: String,
    pub address: S7Address,
}

/// Lower-level S7 session. The ISO-on-TCP wire protocol lives behind this
/// trait; the driver only orchestrates.
///
/// Items are registered once per session and read together, so changing the
/// item set means tearing the session down and registering again.
#[async_trait]
pub trait S7Transport: Send + Sync {
    async fn connect(&self, endpoint: &S7Endpoint) -> Result<(), DomainError>;

    async fn disconnect(&self) -> Result<(), DomainError>;

    /// Replaces the session's read items
    async fn register_items(&self, items: &[S7Item]) -> Result<(), DomainError>;

    async fn remove_item(&self, name: &str) -> Result<(), DomainError>;

    /// Reads every registered item, returning `(name, value)` in registration order.
    async fn read_all(&self) -> Result<Vec<(String, Value)>, DomainError>;

    async fn write_item(&self, item: &S7Item, value: &WireValue) -> Result<(), DomainError>;
}
