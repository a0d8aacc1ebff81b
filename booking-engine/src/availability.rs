//! Offering and availability operations
//!
//! Reads go straight to storage. Every write, including the cross-offering
//! gap check, runs inside the store's single writer.

use crate::config::EngineConfig;
use crate::{Error, Result};
use booking_core::availability::check_placement;
use booking_core::{
    AccountId, AvailabilityWindow, Offering, OfferingId, Role, SlotRequest, Store, TimeSlot,
    TrainingType, Weekday,
};
use chrono::NaiveTime;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// Window with its slots
#[derive(Debug, Clone, Serialize)]
pub struct WindowDetail {
    /// Window
    #[serde(flatten)]
    pub window: AvailabilityWindow,
    /// Slots ordered by start
    pub slots: Vec<TimeSlot>,
}

/// Offering with its availability
#[derive(Debug, Clone, Serialize)]
pub struct OfferingDetail {
    /// Offering
    #[serde(flatten)]
    pub offering: Offering,
    /// Windows
    pub windows: Vec<WindowDetail>,
}

/// Dry-run result of a slot declaration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlotCheck {
    /// Whether the slot could be declared
    pub available: bool,
    /// Reason, or confirmation
    pub message: String,
}

/// Parse `HH:MM` or `HH:MM:SS`
pub fn parse_clock(value: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
        .map_err(|_| Error::Validation(format!("Invalid time '{}', use HH:MM", value)))
}

/// Offering and availability operations
pub struct AvailabilityService {
    store: Arc<Store>,
    config: EngineConfig,
}

impl AvailabilityService {
    /// Create service
    pub fn new(store: Arc<Store>, config: EngineConfig) -> Self {
        Self { store, config }
    }

    fn require_provider(&self, provider: AccountId) -> Result<()> {
        let account = self.store.storage().find_account(provider)?;
        match account {
            Some(account) if account.role == Role::Teacher => Ok(()),
            Some(_) => Err(Error::Forbidden(
                "Only teachers can manage sessions".to_string(),
            )),
            None => Err(Error::NotFound("Teacher not found".to_string())),
        }
    }

    /// Create an offering with its initial slots
    pub async fn create_offering(
        &self,
        provider: AccountId,
        training_type: TrainingType,
        price: Decimal,
        slots: Vec<SlotRequest>,
    ) -> Result<OfferingDetail> {
        self.require_provider(provider)?;
        let offering = Offering::new(provider, training_type, price)?;
        let offering = self
            .store
            .writer()
            .create_offering(offering, slots, self.config.min_gap_minutes)
            .await?;
        self.get_offering(offering.id)
    }

    /// Change an offering's price
    pub async fn update_offering_price(
        &self,
        offering_id: OfferingId,
        provider: AccountId,
        price: Decimal,
    ) -> Result<Offering> {
        Ok(self
            .store
            .writer()
            .update_offering_price(offering_id, provider, price)
            .await?)
    }

    /// Offerings of a provider with their availability
    pub fn list_offerings(&self, provider: AccountId) -> Result<Vec<OfferingDetail>> {
        let mut offerings = self.store.storage().offerings_by_provider(provider)?;
        offerings.sort_by_key(|o| o.created_at);
        offerings
            .into_iter()
            .map(|offering| self.detail(offering))
            .collect()
    }

    /// One offering with its availability
    pub fn get_offering(&self, offering_id: OfferingId) -> Result<OfferingDetail> {
        let offering = self
            .store
            .storage()
            .find_offering(offering_id)?
            .ok_or_else(|| Error::NotFound("Session not found".to_string()))?;
        self.detail(offering)
    }

    fn detail(&self, offering: Offering) -> Result<OfferingDetail> {
        let storage = self.store.storage();
        let mut windows = storage
            .windows_for_offering(offering.id)?
            .into_iter()
            .map(|window| {
                let slots = storage.slots_for_window(window.id)?;
                Ok(WindowDetail { window, slots })
            })
            .collect::<Result<Vec<_>>>()?;
        windows.sort_by_key(|w| w.window.day as u8);
        Ok(OfferingDetail { offering, windows })
    }

    /// Delete an offering; returns how many reservations were detached
    pub async fn delete_offering(&self, offering_id: OfferingId, provider: AccountId) -> Result<usize> {
        let detached = self
            .store
            .writer()
            .delete_offering(offering_id, provider)
            .await?;
        tracing::info!(
            offering_id = %offering_id,
            detached_reservations = detached,
            "Offering deleted"
        );
        Ok(detached)
    }

    /// Declare a slot on an owned offering
    pub async fn declare_time_slot(
        &self,
        offering_id: OfferingId,
        provider: AccountId,
        day: Weekday,
        start: NaiveTime,
        end: NaiveTime,
    ) -> Result<TimeSlot> {
        Ok(self
            .store
            .writer()
            .declare_time_slot(
                offering_id,
                provider,
                SlotRequest { day, start, end },
                self.config.min_gap_minutes,
            )
            .await?)
    }

    /// Delete an owned slot
    pub async fn delete_time_slot(&self, slot_id: Uuid, provider: AccountId) -> Result<()> {
        Ok(self
            .store
            .writer()
            .delete_time_slot(slot_id, provider)
            .await?)
    }

    /// Would `[start, end]` on `day` be accepted for this provider?
    pub fn check_time_slot(
        &self,
        provider: AccountId,
        day: Weekday,
        start: NaiveTime,
        end: NaiveTime,
    ) -> Result<SlotCheck> {
        let existing = self.store.storage().provider_slots_on(provider, day)?;
        match check_placement(start, end, &existing, self.config.min_gap_minutes) {
            Ok(()) => Ok(SlotCheck {
                available: true,
                message: "Time slot is available.".to_string(),
            }),
            Err(booking_core::Error::Validation(message)) => Ok(SlotCheck {
                available: false,
                message,
            }),
            Err(other) => Err(other.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use booking_core::{Account, Config};
    use rust_decimal_macros::dec;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    async fn service() -> (AvailabilityService, Account, tempfile::TempDir) {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        let store = Arc::new(Store::open(config).await.unwrap());

        let teacher = Account::new("coach", "Coach", "coach@example.com", Role::Teacher);
        store.writer().put_account(teacher.clone()).await.unwrap();

        (
            AvailabilityService::new(store, EngineConfig::default()),
            teacher,
            temp_dir,
        )
    }

    #[test]
    fn test_parse_clock() {
        assert_eq!(parse_clock("10:00").unwrap(), t(10, 0));
        assert_eq!(parse_clock("10:00:00").unwrap(), t(10, 0));
        assert!(parse_clock("25:00").is_err());
    }

    #[tokio::test]
    async fn test_create_and_get_offering() {
        let (svc, teacher, _temp) = service().await;
        let detail = svc
            .create_offering(
                teacher.id,
                TrainingType::Virtual,
                dec!(50.00),
                vec![
                    SlotRequest {
                        day: Weekday::Monday,
                        start: t(10, 0),
                        end: t(11, 0),
                    },
                    SlotRequest {
                        day: Weekday::Monday,
                        start: t(14, 0),
                        end: t(15, 0),
                    },
                ],
            )
            .await
            .unwrap();

        assert_eq!(detail.windows.len(), 1);
        assert_eq!(detail.windows[0].slots.len(), 2);
        assert_eq!(svc.list_offerings(teacher.id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_conflicting_initial_slots_write_nothing() {
        let (svc, teacher, _temp) = service().await;
        let result = svc
            .create_offering(
                teacher.id,
                TrainingType::Virtual,
                dec!(50.00),
                vec![
                    SlotRequest {
                        day: Weekday::Monday,
                        start: t(10, 0),
                        end: t(11, 0),
                    },
                    SlotRequest {
                        day: Weekday::Monday,
                        start: t(11, 30),
                        end: t(12, 0),
                    },
                ],
            )
            .await;

        assert!(matches!(result, Err(Error::Validation(_))));
        assert!(svc.list_offerings(teacher.id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_student_cannot_create_offering() {
        let (svc, _teacher, _temp) = service().await;
        let student = Account::new("lee", "", "lee@example.com", Role::Student);
        svc.store.writer().put_account(student.clone()).await.unwrap();

        let result = svc
            .create_offering(student.id, TrainingType::Mindset, dec!(10), vec![])
            .await;
        assert!(matches!(result, Err(Error::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_check_time_slot() {
        let (svc, teacher, _temp) = service().await;
        svc.create_offering(
            teacher.id,
            TrainingType::Virtual,
            dec!(50.00),
            vec![SlotRequest {
                day: Weekday::Monday,
                start: t(10, 0),
                end: t(11, 0),
            }],
        )
        .await
        .unwrap();

        let clash = svc
            .check_time_slot(teacher.id, Weekday::Monday, t(12, 0), t(13, 0))
            .unwrap();
        assert!(!clash.available);

        let free = svc
            .check_time_slot(teacher.id, Weekday::Monday, t(12, 30), t(13, 30))
            .unwrap();
        assert!(free.available);

        let other_day = svc
            .check_time_slot(teacher.id, Weekday::Sunday, t(12, 0), t(13, 0))
            .unwrap();
        assert!(other_day.available);
    }

    #[tokio::test]
    async fn test_price_update_and_delete() {
        let (svc, teacher, _temp) = service().await;
        let detail = svc
            .create_offering(teacher.id, TrainingType::InPerson, dec!(30), vec![])
            .await
            .unwrap();

        let updated = svc
            .update_offering_price(detail.offering.id, teacher.id, dec!(45.50))
            .await
            .unwrap();
        assert_eq!(updated.price, dec!(45.50));

        svc.delete_offering(detail.offering.id, teacher.id)
            .await
            .unwrap();
        assert!(matches!(
            svc.get_offering(detail.offering.id),
            Err(Error::NotFound(_))
        ));
    }
}
