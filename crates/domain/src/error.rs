use thiserror::Error;

/// Domain-level errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    #[error("Connection failure: {0}")]
    ConnectionFailure(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Tag \"{0}\" not found")]
    UnknownTag(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Address \"{address}\" is not a valid {protocol} address")]
    InvalidAddressFormat { protocol: String, address: String },

    #[error("Permission denied: {0} required")]
    PermissionDenied(String),

    #[error("Flow bridge unavailable: {0}")]
    BridgeUnavailable(String),

    #[error("A protocol switch is already in progress")]
    SwitchInProgress,

    #[error("Invalid tag name: {0}")]
    InvalidTagName(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Driver error: {0}")]
    DriverError(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
