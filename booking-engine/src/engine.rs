//! Booking engine
//!
//! Resolves (offering, time slot, date) into a pending reservation and a
//! hosted checkout session.
//!
//! Order of writes:
//! 1. reservation + slot claim (single writer, authoritative conflict check)
//! 2. checkout session (external, on the critical path)
//! 3. checkout id + provider email/notification effects (one write)
//!
//! If step 2 fails the reservation from step 1 is discarded.

use crate::checkout::{CheckoutAdapter, CheckoutRequest};
use crate::config::EngineConfig;
use crate::{Error, Result};
use booking_core::{
    Account, AccountId, Effect, EmailKind, EmailMessage, NotificationRequest, Offering, OfferingId,
    Reservation, ReservationId, Store, TimeSlot, Weekday,
};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rand::Rng;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// Checkout metadata discriminator for session bookings
pub const BOOKED_SESSION: &str = "booked_session";

/// Booking request
#[derive(Debug, Clone)]
pub struct BookingRequest {
    /// Offering to book
    pub offering_id: OfferingId,
    /// Time slot of that offering
    pub time_slot_id: Uuid,
    /// Calendar date of the session
    pub session_date: NaiveDate,
    /// Who books
    pub consumer_id: AccountId,
}

/// Successful booking
#[derive(Debug, Clone, Serialize)]
pub struct BookingConfirmation {
    /// Pending reservation
    pub reservation_id: ReservationId,
    /// Hosted payment page
    pub checkout_url: String,
    /// Checkout session id
    pub checkout_session_id: String,
}

/// Parse a `YYYY-MM-DD` session date
pub fn parse_session_date(value: Option<&str>) -> Result<NaiveDate> {
    let value = value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::Validation("session_date is required (YYYY-MM-DD)".to_string()))?;
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| Error::Validation("Invalid date format, use YYYY-MM-DD".to_string()))
}

/// `{provider}_{consumer}_{6 hex}`
pub fn channel_name(provider: &Account, consumer: &Account) -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..0x100_0000);
    format!("{}_{}_{:06x}", provider.handle, consumer.handle, suffix)
}

/// Booking engine
pub struct BookingEngine {
    store: Arc<Store>,
    checkout: Arc<dyn CheckoutAdapter>,
    config: EngineConfig,
}

impl BookingEngine {
    /// Create engine
    pub fn new(
        store: Arc<Store>,
        checkout: Arc<dyn CheckoutAdapter>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            checkout,
            config,
        })
    }

    /// Book a slot and start checkout
    pub async fn book_slot(&self, request: BookingRequest) -> Result<BookingConfirmation> {
        let storage = self.store.storage();

        let offering = storage
            .find_offering(request.offering_id)?
            .ok_or_else(|| Error::NotFound("Session not found".to_string()))?;

        let (slot, day) = self.resolve_slot(&offering, request.time_slot_id)?;

        if Weekday::of(request.session_date) != day {
            return Err(Error::Validation(format!(
                "This slot is only available on {}",
                day
            )));
        }

        let scheduled_start = self.scheduled_start(request.session_date, &slot)?;

        // Best-effort pre-check; the claim written by the store is authoritative
        if storage
            .slot_claim(offering.id, scheduled_start)?
            .is_some()
        {
            self.store.metrics().conflicts_total.inc();
            return Err(Error::Conflict("This slot is already booked".to_string()));
        }

        let provider = storage
            .find_account(offering.provider_id)?
            .ok_or_else(|| Error::NotFound("Teacher not found".to_string()))?;
        let consumer = storage
            .find_account(request.consumer_id)?
            .ok_or_else(|| Error::NotFound("User not found".to_string()))?;

        let reservation = self
            .create_reservation(&offering, &provider, &consumer, &slot, scheduled_start)
            .await?;

        let checkout_request = self.checkout_request(&offering, &provider, &consumer, &reservation);
        let session = match self.checkout.create_checkout_session(&checkout_request).await {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(
                    reservation_id = %reservation.id,
                    error = %e,
                    "Checkout failed, discarding reservation"
                );
                if let Err(discard_err) =
                    self.store.writer().discard_reservation(reservation.id).await
                {
                    tracing::error!(
                        reservation_id = %reservation.id,
                        error = %discard_err,
                        "Failed to discard reservation after checkout failure"
                    );
                }
                return Err(match e {
                    Error::Checkout(_) => e,
                    other => Error::Checkout(other.to_string()),
                });
            }
        };

        let effects = booking_effects(&offering, &provider, &consumer, &reservation);
        self.store
            .writer()
            .attach_checkout(reservation.id, session.id.clone(), effects)
            .await?;

        tracing::info!(
            reservation_id = %reservation.id,
            offering_id = %offering.id,
            consumer_id = %consumer.id,
            scheduled_start = %scheduled_start,
            "Session booked, awaiting payment"
        );

        Ok(BookingConfirmation {
            reservation_id: reservation.id,
            checkout_url: session.url,
            checkout_session_id: session.id,
        })
    }

    fn resolve_slot(&self, offering: &Offering, slot_id: Uuid) -> Result<(TimeSlot, Weekday)> {
        let invalid = || Error::Validation("Invalid or unavailable time slot".to_string());
        let storage = self.store.storage();

        let slot = storage.find_slot(slot_id)?.ok_or_else(invalid)?;
        let window = storage.find_window(slot.window_id)?.ok_or_else(invalid)?;
        if window.offering_id != offering.id {
            return Err(invalid());
        }
        Ok((slot, window.day))
    }

    /// `date + slot.start` on the marketplace wall clock, as UTC
    pub fn scheduled_start(&self, date: NaiveDate, slot: &TimeSlot) -> Result<DateTime<Utc>> {
        let local = date.and_time(slot.start);
        self.config
            .timezone()?
            .from_local_datetime(&local)
            .single()
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(|| Error::Validation("Invalid session time".to_string()))
    }

    async fn create_reservation(
        &self,
        offering: &Offering,
        provider: &Account,
        consumer: &Account,
        slot: &TimeSlot,
        scheduled_start: DateTime<Utc>,
    ) -> Result<Reservation> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let reservation = Reservation {
                id: Uuid::new_v4(),
                offering_id: Some(offering.id),
                provider_id: Some(provider.id),
                consumer_id: Some(consumer.id),
                channel_name: channel_name(provider, consumer),
                scheduled_start,
                duration_minutes: slot.duration_minutes(),
                paid: false,
                reminder_sent: false,
                notification_reminder_sent: false,
                checkout_session_id: None,
                created_at: Utc::now(),
                paid_at: None,
            };

            match self.store.writer().create_reservation(reservation).await {
                Ok(reservation) => return Ok(reservation),
                Err(booking_core::Error::DuplicateChannel(name))
                    if attempts < self.config.channel_attempts =>
                {
                    tracing::debug!(channel = %name, attempts, "Channel name collision, regenerating");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn checkout_request(
        &self,
        offering: &Offering,
        provider: &Account,
        consumer: &Account,
        reservation: &Reservation,
    ) -> CheckoutRequest {
        let mut metadata = BTreeMap::new();
        metadata.insert("type".to_string(), BOOKED_SESSION.to_string());
        metadata.insert("reservation_id".to_string(), reservation.id.to_string());
        metadata.insert("consumer_id".to_string(), consumer.id.to_string());

        CheckoutRequest {
            product_name: format!("{} with {}", offering.training_type, provider.handle),
            amount: offering.price,
            currency: self.config.checkout.currency.clone(),
            success_url: self.config.success_url(reservation.id),
            cancel_url: self.config.cancel_url(reservation.id),
            metadata,
        }
    }
}

/// Provider email and notification for a new booking
pub fn booking_effects(
    offering: &Offering,
    provider: &Account,
    consumer: &Account,
    reservation: &Reservation,
) -> Vec<Effect> {
    let when = reservation.scheduled_start.format("%Y-%m-%d %H:%M UTC");
    let detail = format!(
        "{} booked a {} session on {}",
        consumer.name(),
        offering.training_type,
        when
    );

    vec![
        Effect::Email(EmailMessage {
            kind: EmailKind::SessionBooked,
            to: provider.email.clone(),
            subject: "New Session Booked".to_string(),
            body: format!(
                "Hello {},\n\n{} ({} minutes).\n",
                provider.name(),
                detail,
                reservation.duration_minutes
            ),
        }),
        Effect::Notify(NotificationRequest {
            recipient_id: provider.id,
            header: "New Session Booked".to_string(),
            detail,
            onclick_location: format!("/teacher/booked-sessions/{}", reservation.id),
        }),
    ]
}
