//! Siemens S7 driver (poll model).

mod address;
mod driver;
mod iso_tcp;
mod simulator;
mod transport;
mod wire;

pub use address::{InferredType, S7Address, S7Area, S7Kind, infer_type, is_foreign};
pub use driver::S7Driver;
pub use iso_tcp::IsoTcpS7;
pub use simulator::SimulatedS7;
pub use transport::{S7Endpoint, S7Item, S7Transport};
