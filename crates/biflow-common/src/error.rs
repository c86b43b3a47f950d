//! Error types for biflow

use thiserror::Error;

/// biflow error type
#[derive(Error, Debug)]
pub enum BiflowError {
    /// Configuration rejected during validation
    #[error("config error: {0}")]
    ConfigError(String),

    /// Port identifier cannot be represented in the requested width
    #[error("port {port} does not fit in {bits} bits")]
    PortOutOfRange {
        /// Offending port identifier
        port: u16,
        /// Width of the target field
        bits: u8,
    },

    /// Both attachment points share one identifier
    #[error("inside and outside attachment points must differ (both are {0})")]
    SamePort(u16),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type for biflow
pub type BiflowResult<T> = Result<T, BiflowError>;
