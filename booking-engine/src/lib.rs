//! Coachbook booking engine
//!
//! Availability management, slot booking with hosted checkout, media
//! access and per-role reservation views, all on top of
//! [`booking_core::Store`].
//!
//! # Booking flow
//!
//! 1. Validate offering, slot ownership and weekday
//! 2. Claim (offering, start) through the store's single writer
//! 3. Request a checkout session; discard the reservation if that fails
//! 4. Attach the checkout id and enqueue provider effects in one write

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, clippy::all)]

pub mod access;
pub mod availability;
pub mod checkout;
pub mod config;
pub mod engine;
pub mod error;
pub mod views;

// Re-exports
pub use access::{HmacTokenIssuer, MediaAccess, MediaGrant, MediaRole, MediaTokenIssuer};
pub use availability::{AvailabilityService, OfferingDetail, SlotCheck, WindowDetail};
pub use checkout::{CheckoutAdapter, CheckoutRequest, CheckoutSession, MockCheckout, StripeCheckout};
pub use config::EngineConfig;
pub use engine::{parse_session_date, BookingConfirmation, BookingEngine, BookingRequest};
pub use error::{Error, Result};
pub use views::{ReservationView, ReservationViews};
