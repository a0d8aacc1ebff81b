//! Coachbook notification dispatch
//!
//! Background delivery of the effects the booking and settlement writes
//! leave in the outbox, and the periodic session reminder scan.
//!
//! Both tasks stop on a `watch` shutdown signal after the batch in flight.

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod config;
pub mod error;
pub mod mailer;
pub mod reminders;
pub mod sink;
pub mod worker;

// Re-exports
pub use config::{Config, OutboxConfig, RelayConfig, ReminderConfig};
pub use error::{Error, Result};
pub use mailer::{LogMailer, Mailer};
pub use reminders::{ReminderScanner, ScanReport};
pub use sink::{Notification, NotificationSink, RelayNotificationSink};
pub use worker::{DeliveryOutcome, DrainReport, OutboxWorker};
