//! Error types for notification dispatch

use thiserror::Error;

/// Result type for dispatch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Dispatch errors
#[derive(Error, Debug)]
pub enum Error {
    /// Store error
    #[error("Store error: {0}")]
    Store(#[from] booking_core::Error),

    /// Notification relay error
    #[error("Relay error: {0}")]
    Relay(String),

    /// Mail delivery error
    #[error("Mail error: {0}")]
    Mail(String),

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

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Relay(err.to_string())
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
