//! Error types for the booking engine

use thiserror::Error;

/// Result type for booking operations
pub type Result<T> = std::result::Result<T, Error>;

/// Booking errors
#[derive(Error, Debug)]
pub enum Error {
    /// Input failed a domain rule
    #[error("{0}")]
    Validation(String),

    /// Slot already booked
    #[error("{0}")]
    Conflict(String),

    /// Entity not found
    #[error("{0}")]
    NotFound(String),

    /// Caller may not act on the entity
    #[error("{0}")]
    Forbidden(String),

    /// Checkout adapter failed
    #[error("Checkout error: {0}")]
    Checkout(String),

    /// Media token issuer failed
    #[error("Media token error: {0}")]
    MediaToken(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Store error
    #[error(transparent)]
    Store(booking_core::Error),
}

impl From<booking_core::Error> for Error {
    fn from(err: booking_core::Error) -> Self {
        match err {
            booking_core::Error::Validation(msg) => Error::Validation(msg),
            booking_core::Error::Conflict(msg) => Error::Conflict(msg),
            booking_core::Error::NotFound(msg) => Error::NotFound(format!("{} not found", msg)),
            booking_core::Error::Forbidden(msg) => Error::Forbidden(msg),
            other => Error::Store(other),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Checkout(err.to_string())
    }
}
