//! Application layer - gateway use cases
//!
//! Wires the tag registry, the driver router and the fan-out path together:
//! - `registry`: base + overlay tag layers with serialized, persisted mutations
//! - `router`: one driver per protocol, one active selection, switch-over
//! - `scheduler`: the periodic status/data tick
//! - `fanout` and `hub`: snapshot delivery to live subscribers and sinks
//! - `service`: permission-checked commands answering `{success, message}`

pub mod fanout;
pub mod hub;
pub mod registry;
pub mod router;
pub mod scheduler;
pub mod service;

pub use fanout::Broadcaster;
pub use hub::{LiveHub, Subscription};
pub use registry::{RemoveOutcome, TagRegistry};
pub use router::DriverRouter;
pub use scheduler::Scheduler;
pub use service::{CommandOutcome, GatewayService, GatewayStatus};
