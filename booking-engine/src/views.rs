//! Per-role reservation views
//!
//! One tagged union, one explicit mapping function per role.

use crate::Result;
use booking_core::{
    Account, AccountId, Offering, Reservation, ReservationId, SessionStatus, Store, TrainingType,
};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// What a consumer sees
#[derive(Debug, Clone, Serialize)]
pub struct ConsumerView {
    /// Reservation
    pub id: ReservationId,
    /// Provider
    pub teacher_id: Option<AccountId>,
    /// Provider display name
    pub teacher_name: Option<String>,
    /// Start
    pub session_time: DateTime<Utc>,
    /// Training type
    pub session_type: Option<TrainingType>,
    /// Relative to now
    pub status: SessionStatus,
}

/// What a provider sees
#[derive(Debug, Clone, Serialize)]
pub struct ProviderView {
    /// Reservation
    pub id: ReservationId,
    /// Consumer
    pub student_id: Option<AccountId>,
    /// Consumer display name
    pub student_name: Option<String>,
    /// Start
    pub session_time: DateTime<Utc>,
    /// Minutes
    pub duration: u32,
    /// Training type
    pub session_type: Option<TrainingType>,
    /// Paid flag
    pub paid: bool,
    /// Relative to now
    pub status: SessionStatus,
}

/// What an operator sees
#[derive(Debug, Clone, Serialize)]
pub struct AdminView {
    /// Stored reservation
    #[serde(flatten)]
    pub reservation: Reservation,
    /// Training type
    pub session_type: Option<TrainingType>,
    /// Offering price
    pub price: Option<Decimal>,
    /// Relative to now
    pub status: SessionStatus,
}

/// Reservation rendered for one audience
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "view", rename_all = "snake_case")]
pub enum ReservationView {
    /// Consumer listing
    Consumer(ConsumerView),
    /// Provider listing
    Provider(ProviderView),
    /// Operator listing
    Admin(AdminView),
}

/// Consumer mapping
pub fn consumer_view(
    reservation: &Reservation,
    provider: Option<&Account>,
    offering: Option<&Offering>,
    now: DateTime<Utc>,
    lead: Duration,
) -> ReservationView {
    ReservationView::Consumer(ConsumerView {
        id: reservation.id,
        teacher_id: reservation.provider_id,
        teacher_name: provider.map(|a| a.name().to_string()),
        session_time: reservation.scheduled_start,
        session_type: offering.map(|o| o.training_type),
        status: reservation.status_at(now, lead),
    })
}

/// Provider mapping
pub fn provider_view(
    reservation: &Reservation,
    consumer: Option<&Account>,
    offering: Option<&Offering>,
    now: DateTime<Utc>,
    lead: Duration,
) -> ReservationView {
    ReservationView::Provider(ProviderView {
        id: reservation.id,
        student_id: reservation.consumer_id,
        student_name: consumer.map(|a| a.name().to_string()),
        session_time: reservation.scheduled_start,
        duration: reservation.duration_minutes,
        session_type: offering.map(|o| o.training_type),
        paid: reservation.paid,
        status: reservation.status_at(now, lead),
    })
}

/// Operator mapping
pub fn admin_view(
    reservation: &Reservation,
    offering: Option<&Offering>,
    now: DateTime<Utc>,
    lead: Duration,
) -> ReservationView {
    ReservationView::Admin(AdminView {
        reservation: reservation.clone(),
        session_type: offering.map(|o| o.training_type),
        price: offering.map(|o| o.price),
        status: reservation.status_at(now, lead),
    })
}

/// Reservation listings
pub struct ReservationViews {
    store: Arc<Store>,
    lead: Duration,
}

impl ReservationViews {
    /// Create listing service
    pub fn new(store: Arc<Store>, lead: Duration) -> Self {
        Self { store, lead }
    }

    /// Paid sessions the consumer booked
    pub fn for_consumer(&self, consumer: AccountId, now: DateTime<Utc>) -> Result<Vec<ReservationView>> {
        let reservations = self.store.storage().reservations_by_consumer(consumer)?;
        let mut lookup = Lookup::new(&self.store);
        reservations
            .iter()
            .filter(|r| r.paid)
            .map(|r| {
                Ok(consumer_view(
                    r,
                    lookup.account(r.provider_id)?.as_ref(),
                    lookup.offering(r.offering_id)?.as_ref(),
                    now,
                    self.lead,
                ))
            })
            .collect()
    }

    /// Sessions booked with the provider
    pub fn for_provider(&self, provider: AccountId, now: DateTime<Utc>) -> Result<Vec<ReservationView>> {
        let reservations = self.store.storage().reservations_by_provider(provider)?;
        let mut lookup = Lookup::new(&self.store);
        reservations
            .iter()
            .map(|r| {
                Ok(provider_view(
                    r,
                    lookup.account(r.consumer_id)?.as_ref(),
                    lookup.offering(r.offering_id)?.as_ref(),
                    now,
                    self.lead,
                ))
            })
            .collect()
    }

    /// Every reservation
    pub fn for_admin(&self, now: DateTime<Utc>) -> Result<Vec<ReservationView>> {
        let mut reservations = self.store.storage().all_reservations()?;
        reservations.sort_by_key(|r| r.scheduled_start);
        let mut lookup = Lookup::new(&self.store);
        reservations
            .iter()
            .map(|r| {
                Ok(admin_view(
                    r,
                    lookup.offering(r.offering_id)?.as_ref(),
                    now,
                    self.lead,
                ))
            })
            .collect()
    }
}

/// Memoized account and offering reads for one listing
struct Lookup<'a> {
    store: &'a Store,
    accounts: HashMap<Uuid, Option<Account>>,
    offerings: HashMap<Uuid, Option<Offering>>,
}

impl<'a> Lookup<'a> {
    fn new(store: &'a Store) -> Self {
        Self {
            store,
            accounts: HashMap::new(),
            offerings: HashMap::new(),
        }
    }

    fn account(&mut self, id: Option<Uuid>) -> Result<Option<Account>> {
        let Some(id) = id else { return Ok(None) };
        if let Some(cached) = self.accounts.get(&id) {
            return Ok(cached.clone());
        }
        let account = self.store.storage().find_account(id)?;
        self.accounts.insert(id, account.clone());
        Ok(account)
    }

    fn offering(&mut self, id: Option<Uuid>) -> Result<Option<Offering>> {
        let Some(id) = id else { return Ok(None) };
        if let Some(cached) = self.offerings.get(&id) {
            return Ok(cached.clone());
        }
        let offering = self.store.storage().find_offering(id)?;
        self.offerings.insert(id, offering.clone());
        Ok(offering)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use booking_core::Role;
    use rust_decimal_macros::dec;

    fn reservation(start: DateTime<Utc>) -> Reservation {
        Reservation {
            id: Uuid::new_v4(),
            offering_id: None,
            provider_id: Some(Uuid::new_v4()),
            consumer_id: None,
            channel_name: "coach_lee_000000".to_string(),
            scheduled_start: start,
            duration_minutes: 45,
            paid: false,
            reminder_sent: false,
            notification_reminder_sent: false,
            checkout_session_id: Some("cs_1".to_string()),
            created_at: start,
            paid_at: None,
        }
    }

    #[test]
    fn test_views_are_tagged() {
        let now = Utc::now();
        let r = reservation(now + Duration::hours(2));
        let provider = Account::new("coach", "Coach Carter", "c@example.com", Role::Teacher);
        let offering = Offering::new(
            provider.id,
            booking_core::TrainingType::Mindset,
            dec!(25),
        )
        .unwrap();

        let view = consumer_view(&r, Some(&provider), Some(&offering), now, Duration::seconds(15));
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["view"], "consumer");
        assert_eq!(json["teacher_name"], "Coach Carter");
        assert_eq!(json["session_type"], "mindset");
        assert_eq!(json["status"], "upcoming");

        let view = admin_view(&r, Some(&offering), now, Duration::seconds(15));
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["view"], "admin");
        assert_eq!(json["channel_name"], "coach_lee_000000");
        assert_eq!(json["price"], "25");
    }

    #[test]
    fn test_provider_view_handles_missing_consumer() {
        let now = Utc::now();
        let r = reservation(now - Duration::hours(2));
        match provider_view(&r, None, None, now, Duration::seconds(15)) {
            ReservationView::Provider(view) => {
                assert!(view.student_id.is_none());
                assert!(view.student_name.is_none());
                assert_eq!(view.status, SessionStatus::Completed);
                assert_eq!(view.duration, 45);
            }
            other => panic!("unexpected view: {:?}", other),
        }
    }
}
