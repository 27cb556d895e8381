//! OPC UA driver (push model).

mod driver;
mod node_id;
mod session;
mod simulator;
mod transport;

pub use driver::OpcUaDriver;
pub use node_id::{Identifier, NodeId};
pub use session::AsyncOpcUaTransport;
pub use simulator::SimulatedOpcUa;
pub use transport::{DataChange, NodeRead, OpcUaTransport, SubscriptionParams};
