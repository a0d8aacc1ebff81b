//! Core types for the booking store
//!
//! All persisted types are designed for:
//! - Deterministic serialization (bincode)
//! - Exact arithmetic (Decimal for money and percentages)
//! - Opaque UUID keys (never sequential integers)

use crate::{Error, Result};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Timelike, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Account identifier
pub type AccountId = Uuid;

/// Offering identifier
pub type OfferingId = Uuid;

/// Reservation identifier
pub type ReservationId = Uuid;

/// Day of the week an availability window recurs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Weekday {
    /// Saturday
    Saturday = 1,
    /// Sunday
    Sunday = 2,
    /// Monday
    Monday = 3,
    /// Tuesday
    Tuesday = 4,
    /// Wednesday
    Wednesday = 5,
    /// Thursday
    Thursday = 6,
    /// Friday
    Friday = 7,
}

impl Weekday {
    /// Lowercase name as used on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            Weekday::Saturday => "saturday",
            Weekday::Sunday => "sunday",
            Weekday::Monday => "monday",
            Weekday::Tuesday => "tuesday",
            Weekday::Wednesday => "wednesday",
            Weekday::Thursday => "thursday",
            Weekday::Friday => "friday",
        }
    }

    /// Parse from a lowercase or capitalized name
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "saturday" => Some(Weekday::Saturday),
            "sunday" => Some(Weekday::Sunday),
            "monday" => Some(Weekday::Monday),
            "tuesday" => Some(Weekday::Tuesday),
            "wednesday" => Some(Weekday::Wednesday),
            "thursday" => Some(Weekday::Thursday),
            "friday" => Some(Weekday::Friday),
            _ => None,
        }
    }

    /// Weekday of a calendar date
    pub fn of(date: NaiveDate) -> Self {
        use chrono::Datelike;
        Self::from(date.weekday())
    }
}

impl From<chrono::Weekday> for Weekday {
    fn from(day: chrono::Weekday) -> Self {
        match day {
            chrono::Weekday::Mon => Weekday::Monday,
            chrono::Weekday::Tue => Weekday::Tuesday,
            chrono::Weekday::Wed => Weekday::Wednesday,
            chrono::Weekday::Thu => Weekday::Thursday,
            chrono::Weekday::Fri => Weekday::Friday,
            chrono::Weekday::Sat => Weekday::Saturday,
            chrono::Weekday::Sun => Weekday::Sunday,
        }
    }
}

impl fmt::Display for Weekday {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind of training a provider offers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum TrainingType {
    /// Remote session over video
    Virtual = 1,
    /// Mindset coaching
    Mindset = 2,
    /// Face-to-face training
    InPerson = 3,
}

impl TrainingType {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            TrainingType::Virtual => "virtual",
            TrainingType::Mindset => "mindset",
            TrainingType::InPerson => "in_person",
        }
    }

    /// Parse from wire name
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "virtual" => Some(TrainingType::Virtual),
            "mindset" => Some(TrainingType::Mindset),
            "in_person" => Some(TrainingType::InPerson),
            _ => None,
        }
    }
}

impl fmt::Display for TrainingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Account role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Books sessions (consumer)
    Student,
    /// Offers sessions (provider)
    Teacher,
    /// Operator
    Admin,
}

impl Role {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Teacher => "teacher",
            Role::Admin => "admin",
        }
    }
}

/// Account tier, flipped by subscriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountTier {
    /// Free tier
    Basic,
    /// Paid tier
    Pro,
}

/// Marketplace account (registration happens elsewhere)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Account ID
    pub id: AccountId,

    /// Unique username, used in channel names
    pub handle: String,

    /// Full name, may be empty
    pub display_name: String,

    /// Contact email
    pub email: String,

    /// Role
    pub role: Role,

    /// Tier
    pub tier: AccountTier,

    /// Teacher capability unlocked by a teacher subscription
    pub can_access_schedule: bool,

    /// Created timestamp
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// New basic-tier account
    pub fn new(
        handle: impl Into<String>,
        display_name: impl Into<String>,
        email: impl Into<String>,
        role: Role,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            handle: handle.into(),
            display_name: display_name.into(),
            email: email.into(),
            role,
            tier: AccountTier::Basic,
            can_access_schedule: false,
            created_at: Utc::now(),
        }
    }

    /// Display name, falling back to the handle
    pub fn name(&self) -> &str {
        if self.display_name.trim().is_empty() {
            &self.handle
        } else {
            &self.display_name
        }
    }
}

/// Bookable training product of one provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offering {
    /// Offering ID
    pub id: OfferingId,

    /// Owning provider
    pub provider_id: AccountId,

    /// Training type (one offering per type per provider)
    pub training_type: TrainingType,

    /// Price per session
    pub price: Decimal,

    /// Created timestamp
    pub created_at: DateTime<Utc>,
}

impl Offering {
    /// Create new offering; price must be positive
    pub fn new(provider_id: AccountId, training_type: TrainingType, price: Decimal) -> Result<Self> {
        if price <= Decimal::ZERO {
            return Err(Error::Validation("Price must be positive".to_string()));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            provider_id,
            training_type,
            price: round_money(price),
            created_at: Utc::now(),
        })
    }
}

/// Recurring weekly availability of an offering on one day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailabilityWindow {
    /// Window ID
    pub id: Uuid,

    /// Offering this window belongs to
    pub offering_id: OfferingId,

    /// Day of week
    pub day: Weekday,
}

/// Bookable sub-range of an availability window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSlot {
    /// Slot ID
    pub id: Uuid,

    /// Parent window
    pub window_id: Uuid,

    /// Start (wall clock)
    pub start: NaiveTime,

    /// End (wall clock), always after start
    pub end: NaiveTime,
}

impl TimeSlot {
    /// Session length in minutes
    pub fn duration_minutes(&self) -> u32 {
        let minutes = (self.end - self.start).num_minutes();
        u32::try_from(minutes).unwrap_or(0)
    }
}

/// Minutes since midnight, ignoring seconds
pub fn minute_of_day(time: NaiveTime) -> i64 {
    i64::from(time.num_seconds_from_midnight() / 60)
}

/// Lifecycle status of a booked session relative to a point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Before the access window opens
    Upcoming,
    /// Inside the access window
    Ongoing,
    /// After the scheduled end
    Completed,
}

/// A booking of one concrete time slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    /// Reservation ID
    pub id: ReservationId,

    /// Offering (nulled when the offering is deleted)
    pub offering_id: Option<OfferingId>,

    /// Provider (nulled when the account is deleted)
    pub provider_id: Option<AccountId>,

    /// Consumer (nulled when the account is deleted)
    pub consumer_id: Option<AccountId>,

    /// Unique real-time channel name
    pub channel_name: String,

    /// Scheduled start
    pub scheduled_start: DateTime<Utc>,

    /// Duration in minutes
    pub duration_minutes: u32,

    /// Set once by settlement, never cleared
    pub paid: bool,

    /// Session-start reminder emails enqueued
    pub reminder_sent: bool,

    /// Session-start reminder notifications enqueued
    pub notification_reminder_sent: bool,

    /// Hosted checkout session, once issued
    pub checkout_session_id: Option<String>,

    /// Created timestamp
    pub created_at: DateTime<Utc>,

    /// Settlement timestamp
    pub paid_at: Option<DateTime<Utc>>,
}

impl Reservation {
    /// Scheduled end
    pub fn scheduled_end(&self) -> DateTime<Utc> {
        self.scheduled_start + Duration::minutes(i64::from(self.duration_minutes))
    }

    /// Access window `[start - lead, end]`
    pub fn access_window(&self, lead: Duration) -> (DateTime<Utc>, DateTime<Utc>) {
        (self.scheduled_start - lead, self.scheduled_end())
    }

    /// Status at `now` given the access lead time
    pub fn status_at(&self, now: DateTime<Utc>, lead: Duration) -> SessionStatus {
        let (opens, closes) = self.access_window(lead);
        if now < opens {
            SessionStatus::Upcoming
        } else if now <= closes {
            SessionStatus::Ongoing
        } else {
            SessionStatus::Completed
        }
    }

    /// Whether `account` is one of the two parties
    pub fn is_party(&self, account: AccountId) -> bool {
        self.provider_id == Some(account) || self.consumer_id == Some(account)
    }
}

/// Platform deduction rates, tiered by engagement history
///
/// Constructed only through [`DeductionPolicy::new`], which enforces
/// `first_engagement > repeat_engagement` and the 1..=100 range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeductionPolicy {
    first_engagement: Decimal,
    repeat_engagement: Decimal,
}

impl DeductionPolicy {
    /// Lowest accepted rate
    pub const MIN_RATE: Decimal = Decimal::ONE;

    /// Highest accepted rate
    pub const MAX_RATE: Decimal = Decimal::ONE_HUNDRED;

    /// Validate and build a policy; rates are stored with 2 decimal places
    pub fn new(first_engagement: Decimal, repeat_engagement: Decimal) -> Result<Self> {
        let first_engagement = round_money(first_engagement);
        let repeat_engagement = round_money(repeat_engagement);

        for rate in [first_engagement, repeat_engagement] {
            if rate < Self::MIN_RATE || rate > Self::MAX_RATE {
                return Err(Error::Validation(format!(
                    "Deduction rate {} must be between {} and {}",
                    rate,
                    Self::MIN_RATE,
                    Self::MAX_RATE
                )));
            }
        }

        if first_engagement <= repeat_engagement {
            return Err(Error::Validation(
                "first_time must be greater than second_time.".to_string(),
            ));
        }

        Ok(Self {
            first_engagement,
            repeat_engagement,
        })
    }

    /// Rate for the first paid booking between a pair
    pub fn first_engagement(&self) -> Decimal {
        self.first_engagement
    }

    /// Rate for every later paid booking between a pair
    pub fn repeat_engagement(&self) -> Decimal {
        self.repeat_engagement
    }

    /// Rate given the number of prior paid bookings between the pair
    pub fn rate_for(&self, prior_paid: usize) -> Decimal {
        if prior_paid == 0 {
            self.first_engagement
        } else {
            self.repeat_engagement
        }
    }
}

/// Round a money amount to cents, banker's rounding
pub fn round_money(amount: Decimal) -> Decimal {
    let mut rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven);
    rounded.rescale(2);
    rounded
}

/// Platform side of a settled reservation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformLedgerEntry {
    /// Entry ID (UUIDv7, time-ordered)
    pub id: Uuid,

    /// Settled reservation
    pub reservation_id: ReservationId,

    /// Amount the consumer paid
    pub gross_amount: Decimal,

    /// Platform share
    pub after_deduction: Decimal,

    /// Deduction percent applied
    pub deduction_percent: Decimal,

    /// Settlement date
    pub date: NaiveDate,
}

/// Provider side of a settled reservation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderLedgerEntry {
    /// Entry ID (UUIDv7, time-ordered)
    pub id: Uuid,

    /// Settled reservation
    pub reservation_id: ReservationId,

    /// Provider credited
    pub provider_id: AccountId,

    /// Amount the consumer paid
    pub gross_amount: Decimal,

    /// Provider share
    pub after_deduction: Decimal,

    /// Deduction percent applied
    pub deduction_percent: Decimal,

    /// Settlement date
    pub date: NaiveDate,
}

/// Everything a settlement commits besides the paid flag
#[derive(Debug, Clone)]
pub struct SettlementPlan {
    /// Platform ledger entry
    pub platform_entry: PlatformLedgerEntry,

    /// Provider ledger entry
    pub provider_entry: ProviderLedgerEntry,

    /// Side effects delivered after commit
    pub effects: Vec<Effect>,
}

/// Builds a settlement plan inside the store's single writer
///
/// Called after the paid-flag check, with the count of prior paid
/// reservations between the same provider and consumer.
pub trait SettlementPlanner: Send + 'static {
    /// Produce the ledger entries and effects for `reservation`
    fn plan(
        &self,
        reservation: &Reservation,
        prior_paid: usize,
        settled_at: DateTime<Utc>,
    ) -> Result<SettlementPlan>;
}

/// Committed settlement
#[derive(Debug, Clone)]
pub struct SettlementRecord {
    /// Reservation after being marked paid
    pub reservation: Reservation,

    /// Platform ledger entry
    pub platform_entry: PlatformLedgerEntry,

    /// Provider ledger entry
    pub provider_entry: ProviderLedgerEntry,
}

/// Result of a settle command
#[derive(Debug, Clone)]
pub enum SettleOutcome {
    /// Marked paid and ledger written
    Settled(SettlementRecord),

    /// Already paid, nothing written
    AlreadyPaid(Reservation),

    /// Reservation lost a party reference, nothing written
    Skipped {
        /// Reservation left untouched
        reservation_id: ReservationId,
        /// Why
        reason: String,
    },
}

/// Who a subscription was bought for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionAudience {
    /// Consumer subscription
    Student,
    /// Provider subscription
    Teacher,
}

/// Paid subscription keyed by the payment provider's transaction id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    /// Subscription ID
    pub id: Uuid,

    /// Subscriber
    pub account_id: AccountId,

    /// Audience
    pub audience: SubscriptionAudience,

    /// Payment provider transaction id (unique)
    pub payment_intent: String,

    /// Amount paid
    pub amount_paid: Decimal,

    /// Validity start
    pub start_date: DateTime<Utc>,

    /// Validity end
    pub end_date: DateTime<Utc>,
}

/// Which reminder flag a reminder claim targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReminderKind {
    /// `reminder_sent`
    Email,
    /// `notification_reminder_sent`
    Notification,
}

/// Kind of outgoing email
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmailKind {
    /// New booking, to the provider
    SessionBooked,
    /// Session starts soon, to either party
    SessionReminder,
}

/// Outgoing email
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailMessage {
    /// Kind
    pub kind: EmailKind,
    /// Recipient address
    pub to: String,
    /// Subject line
    pub subject: String,
    /// Plain-text body
    pub body: String,
}

/// Persisted notification for a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRequest {
    /// Recipient
    pub recipient_id: AccountId,
    /// Title
    pub header: String,
    /// Body
    pub detail: String,
    /// Client route opened on click
    pub onclick_location: String,
}

/// Real-time event for the room `user_{user_id}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeEvent {
    /// Target user
    pub user_id: AccountId,
    /// Event name
    pub event_name: String,
    /// Id the relay assigned when the notification was persisted
    pub notification_id: Uuid,
    /// Payload
    pub notification: NotificationRequest,
}

/// Realtime event name used for notifications
pub const NOTIFICATION_EVENT: &str = "send_notification";

/// Side effect delivered by the outbox worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Effect {
    /// Send an email
    Email(EmailMessage),
    /// Persist a notification, then emit it in real time
    Notify(NotificationRequest),
    /// Emit only (notification already persisted)
    Realtime(RealtimeEvent),
}

impl Effect {
    /// Short label for logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            Effect::Email(_) => "email",
            Effect::Notify(_) => "notify",
            Effect::Realtime(_) => "realtime",
        }
    }
}

/// Durable pending effect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEntry {
    /// Entry ID (UUIDv7)
    pub id: Uuid,

    /// Effect to deliver
    pub effect: Effect,

    /// Failed delivery attempts so far
    pub attempts: u32,

    /// Not delivered before this time
    pub next_attempt_at: DateTime<Utc>,

    /// Last delivery error
    pub last_error: Option<String>,

    /// Created timestamp
    pub created_at: DateTime<Utc>,
}

impl OutboxEntry {
    /// New entry due immediately
    pub fn new(effect: Effect, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            effect,
            attempts: 0,
            next_attempt_at: now,
            last_error: None,
            created_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_weekday_from_date() {
        // 2024-01-01 was a Monday
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert_eq!(Weekday::of(date), Weekday::Monday);
        assert_eq!(Weekday::parse("Tuesday"), Some(Weekday::Tuesday));
        assert_eq!(Weekday::parse("funday"), None);
    }

    #[test]
    fn test_training_type_wire_names() {
        assert_eq!(TrainingType::InPerson.as_str(), "in_person");
        assert_eq!(TrainingType::parse("virtual"), Some(TrainingType::Virtual));
        assert_eq!(TrainingType::parse("remote"), None);
    }

    #[test]
    fn test_policy_requires_first_above_second() {
        assert!(DeductionPolicy::new(dec!(10), dec!(5)).is_ok());
        assert!(DeductionPolicy::new(dec!(5), dec!(5)).is_err());
        assert!(DeductionPolicy::new(dec!(5), dec!(10)).is_err());
    }

    #[test]
    fn test_policy_rates_carry_two_places() {
        let policy = DeductionPolicy::new(dec!(10), dec!(5.5)).unwrap();
        assert_eq!(policy.first_engagement().to_string(), "10.00");
        assert_eq!(policy.repeat_engagement().to_string(), "5.50");

        let offering = Offering::new(Uuid::new_v4(), TrainingType::Virtual, dec!(50)).unwrap();
        assert_eq!(offering.price.to_string(), "50.00");
    }

    #[test]
    fn test_policy_rate_range() {
        assert!(DeductionPolicy::new(dec!(101), dec!(5)).is_err());
        assert!(DeductionPolicy::new(dec!(10), dec!(0.5)).is_err());
    }

    #[test]
    fn test_policy_rate_selection() {
        let policy = DeductionPolicy::new(dec!(20.00), dec!(10.00)).unwrap();
        assert_eq!(policy.rate_for(0), dec!(20));
        assert_eq!(policy.rate_for(1), dec!(10));
        assert_eq!(policy.rate_for(7), dec!(10));
    }

    #[test]
    fn test_reservation_status() {
        let start = Utc::now();
        let reservation = Reservation {
            id: Uuid::new_v4(),
            offering_id: None,
            provider_id: None,
            consumer_id: None,
            channel_name: "a_b_123456".to_string(),
            scheduled_start: start,
            duration_minutes: 60,
            paid: true,
            reminder_sent: false,
            notification_reminder_sent: false,
            checkout_session_id: None,
            created_at: start,
            paid_at: None,
        };
        let lead = Duration::seconds(15);

        assert_eq!(
            reservation.status_at(start - Duration::seconds(20), lead),
            SessionStatus::Upcoming
        );
        assert_eq!(
            reservation.status_at(start - Duration::seconds(10), lead),
            SessionStatus::Ongoing
        );
        assert_eq!(
            reservation.status_at(start + Duration::minutes(61), lead),
            SessionStatus::Completed
        );
    }

    #[test]
    fn test_round_money_bankers() {
        assert_eq!(round_money(dec!(1.005)), dec!(1.00));
        assert_eq!(round_money(dec!(1.015)), dec!(1.02));
    }
}
