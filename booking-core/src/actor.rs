//! Single-writer store actor
//!
//! Every check-then-write sequence (slot placement, slot claim, settlement
//! compare-and-set, reminder flag claims, outbox bookkeeping) runs inside
//! one Tokio task fed by a bounded mailbox. Each command commits at most a
//! handful of RocksDB write batches and none of them interleave.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │     HTTP workers / settlement / outbox worker        │
//! └─────────────────────┬────────────────────────────────┘
//!                       │ StoreHandle (Clone)
//!                       ▼ mpsc::channel (bounded)
//! ┌──────────────────────────────────────────────────────┐
//! │               StoreActor (single task)               │
//! │   validate against Storage → one WriteBatch          │
//! └──────────────────────────────────────────────────────┘
//! ```

use crate::availability::check_placement;
use crate::metrics::Metrics;
use crate::types::{
    Account, AccountId, AccountTier, AvailabilityWindow, DeductionPolicy, Effect, Offering,
    OfferingId, OutboxEntry, ReminderKind, Reservation, ReservationId, SettleOutcome,
    SettlementPlanner, SettlementRecord, Subscription, SubscriptionAudience, TimeSlot, Weekday,
    round_money,
};
use crate::{Error, Result, Storage};
use chrono::{NaiveTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

type Reply<T> = oneshot::Sender<Result<T>>;

/// A slot to declare, as part of a new offering or on its own
#[derive(Debug, Clone, PartialEq)]
pub struct SlotRequest {
    /// Day of week
    pub day: Weekday,
    /// Start (wall clock)
    pub start: NaiveTime,
    /// End (wall clock)
    pub end: NaiveTime,
}

/// Result of recording a subscription payment
#[derive(Debug, Clone)]
pub struct SubscriptionOutcome {
    /// Stored subscription
    pub subscription: Subscription,
    /// False when the payment intent was already recorded
    pub created: bool,
    /// Account after the tier flip
    pub account: Account,
}

/// Command sent to the store actor
pub enum StoreCommand {
    /// Insert or replace an account
    PutAccount {
        account: Account,
        response: Reply<()>,
    },

    /// Delete an account, clearing its party references
    DeleteAccount {
        account_id: AccountId,
        response: Reply<usize>,
    },

    /// Create an offering and its initial slots
    CreateOffering {
        offering: Offering,
        slots: Vec<SlotRequest>,
        min_gap_minutes: i64,
        response: Reply<Offering>,
    },

    /// Change the price of an owned offering
    UpdateOfferingPrice {
        offering_id: OfferingId,
        provider_id: AccountId,
        price: Decimal,
        response: Reply<Offering>,
    },

    /// Delete an owned offering with its availability
    DeleteOffering {
        offering_id: OfferingId,
        provider_id: AccountId,
        response: Reply<usize>,
    },

    /// Declare a slot on an owned offering
    DeclareTimeSlot {
        offering_id: OfferingId,
        provider_id: AccountId,
        slot: SlotRequest,
        min_gap_minutes: i64,
        response: Reply<TimeSlot>,
    },

    /// Delete an owned slot, pruning an emptied window
    DeleteTimeSlot {
        slot_id: Uuid,
        provider_id: AccountId,
        response: Reply<()>,
    },

    /// Create a reservation, claiming its (offering, start)
    CreateReservation {
        reservation: Reservation,
        response: Reply<Reservation>,
    },

    /// Attach a checkout session and enqueue booking effects
    AttachCheckout {
        reservation_id: ReservationId,
        checkout_session_id: String,
        effects: Vec<Effect>,
        response: Reply<Reservation>,
    },

    /// Remove an unpaid reservation that never got a checkout session
    DiscardReservation {
        reservation_id: ReservationId,
        response: Reply<()>,
    },

    /// Mark paid and write the ledger pair, once
    Settle {
        reservation_id: ReservationId,
        planner: Box<dyn SettlementPlanner>,
        response: Reply<SettleOutcome>,
    },

    /// Replace the deduction policy
    PutDeductionPolicy {
        policy: DeductionPolicy,
        response: Reply<()>,
    },

    /// Record a subscription payment and upgrade the account
    RecordSubscription {
        subscription: Subscription,
        response: Reply<SubscriptionOutcome>,
    },

    /// Claim a reminder flag and enqueue its effects, once
    ClaimReminder {
        reservation_id: ReservationId,
        kind: ReminderKind,
        effects: Vec<Effect>,
        response: Reply<bool>,
    },

    /// Delete a delivered outbox entry
    CompleteOutbox {
        entry: OutboxEntry,
        response: Reply<()>,
    },

    /// Replace an outbox entry (retry scheduling)
    RescheduleOutbox {
        previous: OutboxEntry,
        next: OutboxEntry,
        response: Reply<()>,
    },

    /// Move an outbox entry to dead letters
    DeadLetter {
        previous: OutboxEntry,
        last: OutboxEntry,
        response: Reply<()>,
    },

    /// Shutdown actor
    Shutdown,
}

impl StoreCommand {
    fn name(&self) -> &'static str {
        match self {
            StoreCommand::PutAccount { .. } => "put_account",
            StoreCommand::DeleteAccount { .. } => "delete_account",
            StoreCommand::CreateOffering { .. } => "create_offering",
            StoreCommand::UpdateOfferingPrice { .. } => "update_offering_price",
            StoreCommand::DeleteOffering { .. } => "delete_offering",
            StoreCommand::DeclareTimeSlot { .. } => "declare_time_slot",
            StoreCommand::DeleteTimeSlot { .. } => "delete_time_slot",
            StoreCommand::CreateReservation { .. } => "create_reservation",
            StoreCommand::AttachCheckout { .. } => "attach_checkout",
            StoreCommand::DiscardReservation { .. } => "discard_reservation",
            StoreCommand::Settle { .. } => "settle",
            StoreCommand::PutDeductionPolicy { .. } => "put_deduction_policy",
            StoreCommand::RecordSubscription { .. } => "record_subscription",
            StoreCommand::ClaimReminder { .. } => "claim_reminder",
            StoreCommand::CompleteOutbox { .. } => "complete_outbox",
            StoreCommand::RescheduleOutbox { .. } => "reschedule_outbox",
            StoreCommand::DeadLetter { .. } => "dead_letter",
            StoreCommand::Shutdown => "shutdown",
        }
    }
}

/// Actor that owns every store mutation
pub struct StoreActor {
    storage: Arc<Storage>,
    mailbox: mpsc::Receiver<StoreCommand>,
    metrics: Metrics,
}

impl StoreActor {
    /// Create new actor
    pub fn new(
        storage: Arc<Storage>,
        mailbox: mpsc::Receiver<StoreCommand>,
        metrics: Metrics,
    ) -> Self {
        Self {
            storage,
            mailbox,
            metrics,
        }
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        while let Some(command) = self.mailbox.recv().await {
            if let StoreCommand::Shutdown = command {
                tracing::info!("Store actor shutting down");
                break;
            }

            let name = command.name();
            let started = Instant::now();
            self.handle(command);
            self.metrics
                .record_command(started.elapsed().as_secs_f64());
            tracing::trace!(command = name, "Store command handled");
        }
    }

    fn handle(&self, command: StoreCommand) {
        match command {
            StoreCommand::PutAccount { account, response } => {
                let _ = response.send(self.storage.put_account(&account));
            }

            StoreCommand::DeleteAccount {
                account_id,
                response,
            } => {
                let _ = response.send(self.delete_account(account_id));
            }

            StoreCommand::CreateOffering {
                offering,
                slots,
                min_gap_minutes,
                response,
            } => {
                let _ = response.send(self.create_offering(offering, slots, min_gap_minutes));
            }

            StoreCommand::UpdateOfferingPrice {
                offering_id,
                provider_id,
                price,
                response,
            } => {
                let _ = response.send(self.update_offering_price(offering_id, provider_id, price));
            }

            StoreCommand::DeleteOffering {
                offering_id,
                provider_id,
                response,
            } => {
                let result = self
                    .owned_offering(offering_id, provider_id)
                    .and_then(|offering| self.storage.delete_offering(&offering));
                let _ = response.send(result);
            }

            StoreCommand::DeclareTimeSlot {
                offering_id,
                provider_id,
                slot,
                min_gap_minutes,
                response,
            } => {
                let result = self
                    .owned_offering(offering_id, provider_id)
                    .and_then(|offering| self.declare_slot(&offering, &slot, min_gap_minutes));
                let _ = response.send(result);
            }

            StoreCommand::DeleteTimeSlot {
                slot_id,
                provider_id,
                response,
            } => {
                let _ = response.send(self.delete_slot(slot_id, provider_id));
            }

            StoreCommand::CreateReservation {
                reservation,
                response,
            } => {
                let _ = response.send(self.create_reservation(reservation));
            }

            StoreCommand::AttachCheckout {
                reservation_id,
                checkout_session_id,
                effects,
                response,
            } => {
                let result = self.attach_checkout(reservation_id, checkout_session_id, &effects);
                let _ = response.send(result);
            }

            StoreCommand::DiscardReservation {
                reservation_id,
                response,
            } => {
                let _ = response.send(self.discard_reservation(reservation_id));
            }

            StoreCommand::Settle {
                reservation_id,
                planner,
                response,
            } => {
                let _ = response.send(self.settle(reservation_id, planner.as_ref()));
            }

            StoreCommand::PutDeductionPolicy { policy, response } => {
                let _ = response.send(self.storage.put_deduction_policy(&policy));
            }

            StoreCommand::RecordSubscription {
                subscription,
                response,
            } => {
                let _ = response.send(self.record_subscription(subscription));
            }

            StoreCommand::ClaimReminder {
                reservation_id,
                kind,
                effects,
                response,
            } => {
                let _ = response.send(self.claim_reminder(reservation_id, kind, &effects));
            }

            StoreCommand::CompleteOutbox { entry, response } => {
                let _ = response.send(self.storage.complete_outbox(&entry));
            }

            StoreCommand::RescheduleOutbox {
                previous,
                next,
                response,
            } => {
                let _ = response.send(self.storage.reschedule_outbox(&previous, &next));
            }

            StoreCommand::DeadLetter {
                previous,
                last,
                response,
            } => {
                let _ = response.send(self.storage.dead_letter(&previous, &last));
            }

            StoreCommand::Shutdown => {
                // Handled in run loop
            }
        }
    }

    fn owned_offering(&self, offering_id: OfferingId, provider_id: AccountId) -> Result<Offering> {
        let offering = self
            .storage
            .find_offering(offering_id)?
            .ok_or_else(|| Error::NotFound("Session".to_string()))?;
        if offering.provider_id != provider_id {
            return Err(Error::Forbidden(
                "You do not have permission to modify this session.".to_string(),
            ));
        }
        Ok(offering)
    }

    fn delete_account(&self, account_id: AccountId) -> Result<usize> {
        self.storage.get_account(account_id)?;
        for offering in self.storage.offerings_by_provider(account_id)? {
            self.storage.delete_offering(&offering)?;
        }
        let detached = self.storage.delete_account(account_id)?;
        tracing::info!(
            account_id = %account_id,
            detached_reservations = detached,
            "Account deleted"
        );
        Ok(detached)
    }

    fn create_offering(
        &self,
        offering: Offering,
        slots: Vec<SlotRequest>,
        min_gap_minutes: i64,
    ) -> Result<Offering> {
        if self
            .storage
            .offering_by_type(offering.provider_id, offering.training_type)?
            .is_some()
        {
            return Err(Error::Validation(format!(
                "You have already created a {} session.",
                offering.training_type
            )));
        }

        // Validate every requested slot, including against each other,
        // before anything is written
        let mut accepted: Vec<(Weekday, TimeSlot)> = Vec::with_capacity(slots.len());
        for request in &slots {
            let mut existing = self
                .storage
                .provider_slots_on(offering.provider_id, request.day)?;
            existing.extend(
                accepted
                    .iter()
                    .filter(|(day, _)| *day == request.day)
                    .map(|(_, slot)| slot.clone()),
            );
            check_placement(request.start, request.end, &existing, min_gap_minutes)?;
            accepted.push((
                request.day,
                TimeSlot {
                    id: Uuid::new_v4(),
                    window_id: Uuid::nil(),
                    start: request.start,
                    end: request.end,
                },
            ));
        }

        self.storage.insert_offering(&offering)?;
        for request in &slots {
            self.declare_slot(&offering, request, min_gap_minutes)?;
        }

        tracing::info!(
            offering_id = %offering.id,
            provider_id = %offering.provider_id,
            training_type = %offering.training_type,
            slots = slots.len(),
            "Offering created"
        );

        Ok(offering)
    }

    fn update_offering_price(
        &self,
        offering_id: OfferingId,
        provider_id: AccountId,
        price: Decimal,
    ) -> Result<Offering> {
        if price <= Decimal::ZERO {
            return Err(Error::Validation("Price must be positive".to_string()));
        }
        let mut offering = self.owned_offering(offering_id, provider_id)?;
        offering.price = round_money(price);
        self.storage.update_offering(&offering)?;
        Ok(offering)
    }

    fn declare_slot(
        &self,
        offering: &Offering,
        request: &SlotRequest,
        min_gap_minutes: i64,
    ) -> Result<TimeSlot> {
        let existing = self
            .storage
            .provider_slots_on(offering.provider_id, request.day)?;
        check_placement(request.start, request.end, &existing, min_gap_minutes)?;

        let (window, is_new) = match self.storage.window_for_day(offering.id, request.day)? {
            Some(window) => (window, false),
            None => (
                AvailabilityWindow {
                    id: Uuid::new_v4(),
                    offering_id: offering.id,
                    day: request.day,
                },
                true,
            ),
        };

        let slot = TimeSlot {
            id: Uuid::new_v4(),
            window_id: window.id,
            start: request.start,
            end: request.end,
        };
        self.storage
            .insert_slot(if is_new { Some(&window) } else { None }, &slot)?;

        tracing::debug!(
            offering_id = %offering.id,
            slot_id = %slot.id,
            day = %request.day,
            "Time slot declared"
        );

        Ok(slot)
    }

    fn delete_slot(&self, slot_id: Uuid, provider_id: AccountId) -> Result<()> {
        let slot = self
            .storage
            .find_slot(slot_id)?
            .ok_or_else(|| Error::NotFound("Time slot".to_string()))?;
        let window = self.storage.get_window(slot.window_id)?;
        self.owned_offering(window.offering_id, provider_id)?;

        let remaining = self
            .storage
            .slots_for_window(window.id)?
            .into_iter()
            .filter(|other| other.id != slot.id)
            .count();
        let prune = if remaining == 0 { Some(&window) } else { None };
        self.storage.delete_slot(&slot, prune)?;

        tracing::debug!(
            slot_id = %slot_id,
            window_pruned = prune.is_some(),
            "Time slot deleted"
        );
        Ok(())
    }

    fn create_reservation(&self, reservation: Reservation) -> Result<Reservation> {
        if let Some(offering) = reservation.offering_id {
            if self
                .storage
                .slot_claim(offering, reservation.scheduled_start)?
                .is_some()
            {
                self.metrics.conflicts_total.inc();
                return Err(Error::Conflict("This slot is already booked".to_string()));
            }
        }

        if self.storage.channel_taken(&reservation.channel_name)? {
            return Err(Error::DuplicateChannel(reservation.channel_name));
        }

        self.storage.insert_reservation(&reservation)?;
        self.metrics.reservations_total.inc();

        tracing::info!(
            reservation_id = %reservation.id,
            scheduled_start = %reservation.scheduled_start,
            "Reservation created"
        );

        Ok(reservation)
    }

    fn attach_checkout(
        &self,
        reservation_id: ReservationId,
        checkout_session_id: String,
        effects: &[Effect],
    ) -> Result<Reservation> {
        let mut reservation = self.storage.get_reservation(reservation_id)?;
        reservation.checkout_session_id = Some(checkout_session_id);
        self.storage
            .update_reservation(&reservation, effects, Utc::now())?;
        Ok(reservation)
    }

    fn discard_reservation(&self, reservation_id: ReservationId) -> Result<()> {
        let reservation = match self.storage.find_reservation(reservation_id)? {
            Some(reservation) => reservation,
            None => return Ok(()),
        };
        if reservation.paid || reservation.checkout_session_id.is_some() {
            return Err(Error::Conflict(format!(
                "Reservation {} is already exposed and cannot be discarded",
                reservation_id
            )));
        }
        self.storage.remove_reservation(&reservation)?;
        tracing::warn!(reservation_id = %reservation_id, "Pending reservation discarded");
        Ok(())
    }

    fn settle(
        &self,
        reservation_id: ReservationId,
        planner: &dyn SettlementPlanner,
    ) -> Result<SettleOutcome> {
        let mut reservation = self.storage.get_reservation(reservation_id)?;

        if reservation.paid {
            self.metrics.record_settlement("already_paid");
            return Ok(SettleOutcome::AlreadyPaid(reservation));
        }

        // Ledger entries exist without the paid flag: never write a second pair
        if self.storage.is_settled(reservation_id)? {
            tracing::warn!(
                reservation_id = %reservation_id,
                "Ledger entries already present for unpaid reservation"
            );
            self.metrics.record_settlement("already_paid");
            return Ok(SettleOutcome::AlreadyPaid(reservation));
        }

        let (provider, consumer) = match (reservation.provider_id, reservation.consumer_id) {
            (Some(provider), Some(consumer)) => (provider, consumer),
            _ => {
                self.metrics.record_settlement("skipped");
                return Ok(SettleOutcome::Skipped {
                    reservation_id,
                    reason: "Reservation has lost its provider or consumer".to_string(),
                });
            }
        };

        let prior_paid = self
            .storage
            .count_prior_paid(provider, consumer, reservation_id)?;
        let now = Utc::now();
        let plan = planner.plan(&reservation, prior_paid, now)?;

        reservation.paid = true;
        reservation.paid_at = Some(now);
        self.storage.commit_settlement(&reservation, &plan, now)?;
        self.metrics.record_settlement("settled");

        Ok(SettleOutcome::Settled(SettlementRecord {
            reservation,
            platform_entry: plan.platform_entry,
            provider_entry: plan.provider_entry,
        }))
    }

    fn record_subscription(&self, subscription: Subscription) -> Result<SubscriptionOutcome> {
        let mut account = self.storage.get_account(subscription.account_id)?;

        let (subscription, created) =
            match self.storage.subscription_by_intent(&subscription.payment_intent)? {
                Some(existing) => (
                    Subscription {
                        amount_paid: subscription.amount_paid,
                        start_date: subscription.start_date,
                        end_date: subscription.end_date,
                        ..existing
                    },
                    false,
                ),
                None => (subscription, true),
            };

        account.tier = AccountTier::Pro;
        if subscription.audience == SubscriptionAudience::Teacher {
            account.can_access_schedule = true;
        }

        self.storage.upsert_subscription(&subscription, &account)?;
        if created {
            self.metrics.subscriptions_total.inc();
        }

        tracing::info!(
            account_id = %account.id,
            payment_intent = %subscription.payment_intent,
            created,
            "Subscription recorded"
        );

        Ok(SubscriptionOutcome {
            subscription,
            created,
            account,
        })
    }

    fn claim_reminder(
        &self,
        reservation_id: ReservationId,
        kind: ReminderKind,
        effects: &[Effect],
    ) -> Result<bool> {
        let mut reservation = self.storage.get_reservation(reservation_id)?;
        let flag = match kind {
            ReminderKind::Email => &mut reservation.reminder_sent,
            ReminderKind::Notification => &mut reservation.notification_reminder_sent,
        };
        if *flag {
            return Ok(false);
        }
        *flag = true;

        self.storage
            .update_reservation(&reservation, effects, Utc::now())?;
        self.metrics.record_reminder(match kind {
            ReminderKind::Email => "email",
            ReminderKind::Notification => "notification",
        });
        Ok(true)
    }
}

/// Handle for sending commands to the actor
#[derive(Clone, Debug)]
pub struct StoreHandle {
    sender: mpsc::Sender<StoreCommand>,
}

impl StoreHandle {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<StoreCommand>) -> Self {
        Self { sender }
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> StoreCommand) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }

    /// Insert or replace an account
    pub async fn put_account(&self, account: Account) -> Result<()> {
        self.request(|response| StoreCommand::PutAccount { account, response })
            .await
    }

    /// Delete an account
    pub async fn delete_account(&self, account_id: AccountId) -> Result<usize> {
        self.request(|response| StoreCommand::DeleteAccount {
            account_id,
            response,
        })
        .await
    }

    /// Create an offering with initial slots
    pub async fn create_offering(
        &self,
        offering: Offering,
        slots: Vec<SlotRequest>,
        min_gap_minutes: i64,
    ) -> Result<Offering> {
        self.request(|response| StoreCommand::CreateOffering {
            offering,
            slots,
            min_gap_minutes,
            response,
        })
        .await
    }

    /// Change an offering's price
    pub async fn update_offering_price(
        &self,
        offering_id: OfferingId,
        provider_id: AccountId,
        price: Decimal,
    ) -> Result<Offering> {
        self.request(|response| StoreCommand::UpdateOfferingPrice {
            offering_id,
            provider_id,
            price,
            response,
        })
        .await
    }

    /// Delete an offering
    pub async fn delete_offering(
        &self,
        offering_id: OfferingId,
        provider_id: AccountId,
    ) -> Result<usize> {
        self.request(|response| StoreCommand::DeleteOffering {
            offering_id,
            provider_id,
            response,
        })
        .await
    }

    /// Declare a time slot
    pub async fn declare_time_slot(
        &self,
        offering_id: OfferingId,
        provider_id: AccountId,
        slot: SlotRequest,
        min_gap_minutes: i64,
    ) -> Result<TimeSlot> {
        self.request(|response| StoreCommand::DeclareTimeSlot {
            offering_id,
            provider_id,
            slot,
            min_gap_minutes,
            response,
        })
        .await
    }

    /// Delete a time slot
    pub async fn delete_time_slot(&self, slot_id: Uuid, provider_id: AccountId) -> Result<()> {
        self.request(|response| StoreCommand::DeleteTimeSlot {
            slot_id,
            provider_id,
            response,
        })
        .await
    }

    /// Create a reservation
    pub async fn create_reservation(&self, reservation: Reservation) -> Result<Reservation> {
        self.request(|response| StoreCommand::CreateReservation {
            reservation,
            response,
        })
        .await
    }

    /// Attach a checkout session and enqueue effects
    pub async fn attach_checkout(
        &self,
        reservation_id: ReservationId,
        checkout_session_id: String,
        effects: Vec<Effect>,
    ) -> Result<Reservation> {
        self.request(|response| StoreCommand::AttachCheckout {
            reservation_id,
            checkout_session_id,
            effects,
            response,
        })
        .await
    }

    /// Discard a never-exposed reservation
    pub async fn discard_reservation(&self, reservation_id: ReservationId) -> Result<()> {
        self.request(|response| StoreCommand::DiscardReservation {
            reservation_id,
            response,
        })
        .await
    }

    /// Settle a reservation
    pub async fn settle(
        &self,
        reservation_id: ReservationId,
        planner: Box<dyn SettlementPlanner>,
    ) -> Result<SettleOutcome> {
        self.request(|response| StoreCommand::Settle {
            reservation_id,
            planner,
            response,
        })
        .await
    }

    /// Replace the deduction policy
    pub async fn put_deduction_policy(&self, policy: DeductionPolicy) -> Result<()> {
        self.request(|response| StoreCommand::PutDeductionPolicy { policy, response })
            .await
    }

    /// Record a subscription payment
    pub async fn record_subscription(
        &self,
        subscription: Subscription,
    ) -> Result<SubscriptionOutcome> {
        self.request(|response| StoreCommand::RecordSubscription {
            subscription,
            response,
        })
        .await
    }

    /// Claim a reminder flag
    pub async fn claim_reminder(
        &self,
        reservation_id: ReservationId,
        kind: ReminderKind,
        effects: Vec<Effect>,
    ) -> Result<bool> {
        self.request(|response| StoreCommand::ClaimReminder {
            reservation_id,
            kind,
            effects,
            response,
        })
        .await
    }

    /// Delete a delivered outbox entry
    pub async fn complete_outbox(&self, entry: OutboxEntry) -> Result<()> {
        self.request(|response| StoreCommand::CompleteOutbox { entry, response })
            .await
    }

    /// Replace an outbox entry
    pub async fn reschedule_outbox(&self, previous: OutboxEntry, next: OutboxEntry) -> Result<()> {
        self.request(|response| StoreCommand::RescheduleOutbox {
            previous,
            next,
            response,
        })
        .await
    }

    /// Dead-letter an outbox entry
    pub async fn dead_letter(&self, previous: OutboxEntry, last: OutboxEntry) -> Result<()> {
        self.request(|response| StoreCommand::DeadLetter {
            previous,
            last,
            response,
        })
        .await
    }

    /// Shutdown actor
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(StoreCommand::Shutdown)
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;
        Ok(())
    }
}

/// Spawn the store actor
pub fn spawn_store_actor(
    storage: Arc<Storage>,
    metrics: Metrics,
    mailbox_capacity: usize,
) -> StoreHandle {
    let (tx, rx) = mpsc::channel(mailbox_capacity);
    let actor = StoreActor::new(storage, rx, metrics);

    tokio::spawn(async move {
        actor.run().await;
    });

    StoreHandle::new(tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Role, TrainingType};
    use crate::Config;
    use chrono::TimeZone;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    async fn spawn() -> (StoreHandle, Arc<Storage>, tempfile::TempDir) {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();

        let storage = Arc::new(Storage::open(&config).unwrap());
        let handle = spawn_store_actor(storage.clone(), Metrics::new().unwrap(), 16);
        (handle, storage, temp_dir)
    }

    fn offering(provider: AccountId, training_type: TrainingType) -> Offering {
        Offering::new(provider, training_type, Decimal::new(5000, 2)).unwrap()
    }

    fn monday(day: Weekday) -> SlotRequest {
        SlotRequest {
            day,
            start: t(10, 0),
            end: t(11, 0),
        }
    }

    #[tokio::test]
    async fn test_actor_spawn_and_shutdown() {
        let (handle, _storage, _temp) = spawn().await;
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_training_type_rejected() {
        let (handle, _storage, _temp) = spawn().await;
        let provider = Uuid::new_v4();

        handle
            .create_offering(offering(provider, TrainingType::Virtual), vec![], 90)
            .await
            .unwrap();
        let err = handle
            .create_offering(offering(provider, TrainingType::Virtual), vec![], 90)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(ref m) if m == "You have already created a virtual session."));
    }

    #[tokio::test]
    async fn test_gap_spans_offerings() {
        let (handle, _storage, _temp) = spawn().await;
        let provider = Uuid::new_v4();

        handle
            .create_offering(
                offering(provider, TrainingType::Virtual),
                vec![monday(Weekday::Monday)],
                90,
            )
            .await
            .unwrap();
        let mindset = handle
            .create_offering(offering(provider, TrainingType::Mindset), vec![], 90)
            .await
            .unwrap();

        let too_close = SlotRequest {
            day: Weekday::Monday,
            start: t(12, 0),
            end: t(13, 0),
        };
        assert!(matches!(
            handle
                .declare_time_slot(mindset.id, provider, too_close.clone(), 90)
                .await,
            Err(Error::Validation(_))
        ));

        let far_enough = SlotRequest {
            day: Weekday::Monday,
            start: t(12, 30),
            end: t(13, 30),
        };
        handle
            .declare_time_slot(mindset.id, provider, far_enough, 90)
            .await
            .unwrap();

        let other_day = SlotRequest {
            day: Weekday::Tuesday,
            ..too_close
        };
        handle
            .declare_time_slot(mindset.id, provider, other_day, 90)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_owner_checks() {
        let (handle, _storage, _temp) = spawn().await;
        let provider = Uuid::new_v4();
        let created = handle
            .create_offering(offering(provider, TrainingType::Virtual), vec![], 90)
            .await
            .unwrap();

        let intruder = Uuid::new_v4();
        assert!(matches!(
            handle
                .declare_time_slot(created.id, intruder, monday(Weekday::Monday), 90)
                .await,
            Err(Error::Forbidden(_))
        ));
        assert!(matches!(
            handle.delete_offering(created.id, intruder).await,
            Err(Error::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_last_slot_prunes_window() {
        let (handle, storage, _temp) = spawn().await;
        let provider = Uuid::new_v4();
        let created = handle
            .create_offering(offering(provider, TrainingType::Virtual), vec![], 90)
            .await
            .unwrap();
        let slot = handle
            .declare_time_slot(created.id, provider, monday(Weekday::Monday), 90)
            .await
            .unwrap();

        handle.delete_time_slot(slot.id, provider).await.unwrap();
        assert!(storage
            .window_for_day(created.id, Weekday::Monday)
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_claim_reminder_once() {
        let (handle, _storage, _temp) = spawn().await;
        let reservation = Reservation {
            id: Uuid::new_v4(),
            offering_id: Some(Uuid::new_v4()),
            provider_id: Some(Uuid::new_v4()),
            consumer_id: Some(Uuid::new_v4()),
            channel_name: "p_c_abcdef".to_string(),
            scheduled_start: Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap(),
            duration_minutes: 60,
            paid: true,
            reminder_sent: false,
            notification_reminder_sent: false,
            checkout_session_id: None,
            created_at: Utc::now(),
            paid_at: None,
        };
        handle.create_reservation(reservation.clone()).await.unwrap();

        assert!(handle
            .claim_reminder(reservation.id, ReminderKind::Email, vec![])
            .await
            .unwrap());
        assert!(!handle
            .claim_reminder(reservation.id, ReminderKind::Email, vec![])
            .await
            .unwrap());
        assert!(handle
            .claim_reminder(reservation.id, ReminderKind::Notification, vec![])
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_subscription_is_idempotent_per_intent() {
        let (handle, storage, _temp) = spawn().await;
        let account = Account::new("coach", "", "coach@example.com", Role::Teacher);
        handle.put_account(account.clone()).await.unwrap();

        let now = Utc::now();
        let subscription = Subscription {
            id: Uuid::new_v4(),
            account_id: account.id,
            audience: SubscriptionAudience::Teacher,
            payment_intent: "pi_123".to_string(),
            amount_paid: Decimal::new(1999, 2),
            start_date: now,
            end_date: now + chrono::Duration::days(30),
        };

        let first = handle
            .record_subscription(subscription.clone())
            .await
            .unwrap();
        let mut again = subscription.clone();
        again.id = Uuid::new_v4();
        let second = handle.record_subscription(again).await.unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(second.subscription.id, subscription.id);
        assert_eq!(storage.subscriptions_for_account(account.id).unwrap().len(), 1);

        let stored = storage.get_account(account.id).unwrap();
        assert_eq!(stored.tier, AccountTier::Pro);
        assert!(stored.can_access_schedule);
    }
}
