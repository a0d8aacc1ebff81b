//! Revenue split
//!
//! platform = round(gross × rate / 100, 2, banker's), provider = gross − platform.
//! The two shares always add back up to the gross amount.

use booking_core::types::round_money;
use booking_core::{
    DeductionPolicy, Effect, NotificationRequest, PlatformLedgerEntry, ProviderLedgerEntry,
    Reservation, SettlementPlan, SettlementPlanner,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

/// Split of one payment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevenueSplit {
    /// Amount paid
    pub gross: Decimal,
    /// Deduction percent applied
    pub rate: Decimal,
    /// Platform share
    pub platform_share: Decimal,
    /// Provider share
    pub provider_share: Decimal,
}

impl RevenueSplit {
    /// Split `gross` at `rate` percent
    pub fn compute(gross: Decimal, rate: Decimal) -> Self {
        let platform_share = round_money(gross * rate / Decimal::ONE_HUNDRED);
        Self {
            gross,
            rate,
            platform_share,
            provider_share: gross - platform_share,
        }
    }
}

/// Minor units to a 2-place decimal
pub fn gross_from_cents(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

/// Plans a settlement from the policy and the gross amount
///
/// Runs inside the store writer, after the paid-flag check, so the prior
/// paid count it receives is exact.
#[derive(Debug, Clone)]
pub struct SplitPlanner {
    policy: DeductionPolicy,
    gross: Decimal,
}

impl SplitPlanner {
    /// Create planner
    pub fn new(policy: DeductionPolicy, gross: Decimal) -> Self {
        Self { policy, gross }
    }
}

impl SettlementPlanner for SplitPlanner {
    fn plan(
        &self,
        reservation: &Reservation,
        prior_paid: usize,
        settled_at: DateTime<Utc>,
    ) -> booking_core::Result<SettlementPlan> {
        let (provider_id, consumer_id) = match (reservation.provider_id, reservation.consumer_id) {
            (Some(provider), Some(consumer)) => (provider, consumer),
            _ => {
                return Err(booking_core::Error::Validation(
                    "Reservation has lost its provider or consumer".to_string(),
                ))
            }
        };

        let rate = self.policy.rate_for(prior_paid);
        let split = RevenueSplit::compute(self.gross, rate);
        let date = settled_at.date_naive();

        let platform_entry = PlatformLedgerEntry {
            id: Uuid::now_v7(),
            reservation_id: reservation.id,
            gross_amount: split.gross,
            after_deduction: split.platform_share,
            deduction_percent: rate,
            date,
        };
        let provider_entry = ProviderLedgerEntry {
            id: Uuid::now_v7(),
            reservation_id: reservation.id,
            provider_id,
            gross_amount: split.gross,
            after_deduction: split.provider_share,
            deduction_percent: rate,
            date,
        };

        let when = reservation.scheduled_start.format("%Y-%m-%d %H:%M UTC");
        let effects = vec![
            Effect::Notify(NotificationRequest {
                recipient_id: provider_id,
                header: "Payment Received".to_string(),
                detail: format!(
                    "Payment of {} received for the session on {}. Your share is {}.",
                    split.gross, when, split.provider_share
                ),
                onclick_location: format!("/teacher/booked-sessions/{}", reservation.id),
            }),
            Effect::Notify(NotificationRequest {
                recipient_id: consumer_id,
                header: "Payment Confirmed".to_string(),
                detail: format!(
                    "Your payment of {} is confirmed. Your session starts {}.",
                    split.gross, when
                ),
                onclick_location: format!("/booked-sessions/{}", reservation.id),
            }),
        ];

        Ok(SettlementPlan {
            platform_entry,
            provider_entry,
            effects,
        })
    }
}
