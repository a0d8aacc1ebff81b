//! Coachbook settlement
//!
//! Turns payment provider webhooks into paid reservations, income ledger
//! entries and subscriptions.
//!
//! # Flow
//!
//! 1. Verify the webhook signature (`t=..,v1=..` HMAC-SHA256)
//! 2. Classify the checkout by its metadata
//! 3. Load the deduction policy and plan the revenue split
//! 4. Mark paid, write both ledger entries and queue notifications in one batch
//!
//! # Revenue Split
//!
//! The first paid session between a provider and a consumer is charged the
//! first-engagement rate, every later one the repeat rate.

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod config;
pub mod engine;
pub mod error;
pub mod policy;
pub mod split;
pub mod webhook;

// Re-exports
pub use config::{Config, SeedPolicy};
pub use engine::{IncomeReport, SettlementEngine, WebhookOutcome};
pub use error::{Error, Result};
pub use policy::{FixedPolicy, PolicyRepository, StorePolicyRepository};
pub use split::{gross_from_cents, RevenueSplit, SplitPlanner};
pub use webhook::{PaymentPurpose, WebhookEvent};
