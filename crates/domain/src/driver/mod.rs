mod connection_state;
mod device_driver;
mod protocol;

pub use connection_state::ConnectionState;
pub use device_driver::{AcquisitionMode, ConnectionInfo, DeviceDriver, WriteOutcome};
pub use protocol::Protocol;
