//! Error types for the settlement engine

use thiserror::Error;

/// Result type for settlement operations
pub type Result<T> = std::result::Result<T, Error>;

/// Settlement errors
#[derive(Error, Debug)]
pub enum Error {
    /// Store error
    #[error("Store error: {0}")]
    Store(#[from] booking_core::Error),

    /// No deduction policy configured
    #[error("No deduction policy is configured")]
    PolicyMissing,

    /// Webhook signature missing, malformed, stale or wrong
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// Webhook body is not a usable event
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether the error is a missing entity in the store
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Store(booking_core::Error::NotFound(_)))
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}
