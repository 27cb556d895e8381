//! Domain layer - Pure gateway model with no I/O
//!
//! This crate contains:
//! - Tag model (names, datatypes, samples, the effective tag table)
//! - Write-path value coercion
//! - The protocol-agnostic `DeviceDriver` port and connection state machine
//! - Gateway events, sinks and the audit trail model
//! - Requester capabilities and the flow-engine bridge port
//!
//! Principles:
//! - No dependencies on infrastructure
//! - Protocol specifics stay behind traits
//! - Testable in isolation

pub mod audit;
pub mod auth;
pub mod bridge;
pub mod coercion;
pub mod driver;
pub mod error;
pub mod event;
pub mod tag;

// Re-export commonly used types
pub use auth::{Permission, Requester};
pub use coercion::{WireType, WireValue};
pub use error::DomainError;
pub use event::GatewayEvent;
pub use tag::{Sample, Snapshot, TagDataType, TagDefinition, TagName, TagQuality, TagTable};
