//! Coachbook booking core
//!
//! Domain types and the durable store behind offerings, availability,
//! reservations, the income ledger and the effect outbox.
//!
//! # Architecture
//!
//! - **Single Writer**: one actor task owns every check-then-write, so slot
//!   claims and settlements cannot race
//! - **Atomic Batches**: each state change and its indices and outbox
//!   effects commit in one RocksDB `WriteBatch`
//! - **Exact Money**: amounts and rates are `Decimal`, never floats
//!
//! # Invariants
//!
//! - At most one reservation per (offering, scheduled start)
//! - A reservation is marked paid at most once, with exactly one ledger pair
//! - platform share + provider share == gross amount
//! - A provider has at most one offering per training type

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod actor;
pub mod availability;
pub mod config;
pub mod error;
pub mod metrics;
pub mod storage;
pub mod store;
pub mod types;

// Re-exports
pub use actor::{SlotRequest, StoreHandle, SubscriptionOutcome};
pub use config::Config;
pub use error::{Error, Result};
pub use metrics::Metrics;
pub use storage::Storage;
pub use store::Store;
pub use types::{
    Account, AccountId, AccountTier, AvailabilityWindow, DeductionPolicy, Effect, EmailKind,
    EmailMessage, NotificationRequest, Offering, OfferingId, OutboxEntry, PlatformLedgerEntry,
    ProviderLedgerEntry, RealtimeEvent, ReminderKind, Reservation, ReservationId, Role,
    SessionStatus, SettleOutcome, SettlementPlan, SettlementPlanner, SettlementRecord,
    Subscription, SubscriptionAudience, TimeSlot, TrainingType, Weekday,
};
