//! Main settlement engine
//!
//! Consumes payment webhooks, marks reservations paid, splits revenue and
//! records subscriptions. Every state change goes through the store writer,
//! so duplicate deliveries settle exactly once.

use crate::{
    config::{Config, SeedPolicy},
    policy::PolicyRepository,
    split::{gross_from_cents, SplitPlanner},
    webhook::{self, PaymentPurpose, CHECKOUT_COMPLETED},
    Error, Result,
};
use booking_core::{
    AccountId, DeductionPolicy, PlatformLedgerEntry, ProviderLedgerEntry, ReservationId,
    SettleOutcome, Store, Subscription, SubscriptionAudience, SubscriptionOutcome,
};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// What a webhook delivery did
#[derive(Debug, Clone)]
pub enum WebhookOutcome {
    /// Reservation settled or already paid
    Settlement(SettleOutcome),
    /// Subscription recorded
    SubscriptionRecorded(SubscriptionOutcome),
    /// Acknowledged without any write
    Ignored {
        /// Why the event was dropped
        reason: String,
    },
}

/// Ledger listing with totals
#[derive(Debug, Clone, Serialize)]
pub struct IncomeReport<T> {
    /// Entries, oldest first
    pub entries: Vec<T>,
    /// Sum of gross amounts
    pub total_gross: Decimal,
    /// Sum of shares
    pub total_after_deduction: Decimal,
}

/// Settlement engine
pub struct SettlementEngine {
    /// Booking store
    store: Arc<Store>,

    /// Deduction policy source
    policy: Arc<dyn PolicyRepository>,

    /// Configuration
    config: Config,
}

impl std::fmt::Debug for SettlementEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettlementEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SettlementEngine {
    /// Create new settlement engine
    pub fn new(store: Arc<Store>, policy: Arc<dyn PolicyRepository>, config: Config) -> Self {
        Self {
            store,
            policy,
            config,
        }
    }

    /// Settle a reservation paid `gross_cents` minor units
    pub async fn settle(
        &self,
        reservation_id: ReservationId,
        gross_cents: i64,
    ) -> Result<SettleOutcome> {
        if gross_cents < 0 {
            return Err(Error::InvalidPayload(format!(
                "negative amount {}",
                gross_cents
            )));
        }

        let reservation = self.store.storage().get_reservation(reservation_id)?;
        if reservation.paid {
            tracing::info!(reservation_id = %reservation_id, "Reservation already paid");
            self.store.metrics().record_settlement("already_paid");
            return Ok(SettleOutcome::AlreadyPaid(reservation));
        }

        let policy = self.policy.current()?.ok_or(Error::PolicyMissing)?;
        let planner = SplitPlanner::new(policy, gross_from_cents(gross_cents));
        let outcome = self
            .store
            .writer()
            .settle(reservation_id, Box::new(planner))
            .await?;

        match &outcome {
            SettleOutcome::Settled(record) => tracing::info!(
                reservation_id = %reservation_id,
                gross = %record.platform_entry.gross_amount,
                rate = %record.platform_entry.deduction_percent,
                platform_share = %record.platform_entry.after_deduction,
                provider_share = %record.provider_entry.after_deduction,
                "Reservation settled"
            ),
            SettleOutcome::AlreadyPaid(_) => {
                tracing::info!(reservation_id = %reservation_id, "Reservation already paid")
            }
            SettleOutcome::Skipped { reason, .. } => {
                tracing::warn!(reservation_id = %reservation_id, reason = %reason, "Settlement skipped")
            }
        }

        Ok(outcome)
    }

    /// Record a subscription payment
    pub async fn record_subscription(
        &self,
        account_id: AccountId,
        audience: SubscriptionAudience,
        payment_intent: &str,
        amount_cents: i64,
        now: DateTime<Utc>,
    ) -> Result<SubscriptionOutcome> {
        let subscription = Subscription {
            id: Uuid::now_v7(),
            account_id,
            audience,
            payment_intent: payment_intent.to_string(),
            amount_paid: gross_from_cents(amount_cents),
            start_date: now,
            end_date: now + Duration::days(self.config.subscription_days),
        };

        Ok(self.store.writer().record_subscription(subscription).await?)
    }

    /// Verify, parse and apply one webhook delivery
    pub async fn handle_webhook(
        &self,
        body: &[u8],
        signature: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<WebhookOutcome> {
        let verified = match signature {
            Some(header) => webhook::verify_signature(
                &self.config.webhook_secret,
                header,
                body,
                now.timestamp(),
                self.config.signature_tolerance_secs,
            ),
            None => Err(Error::InvalidSignature("missing signature header".to_string())),
        };

        if let Err(e) = verified {
            if !self.config.allow_unverified_webhooks {
                tracing::warn!(error = %e, "Webhook rejected");
                return Err(e);
            }
            tracing::warn!(error = %e, "Webhook signature failed, parsing unverified body");
        }

        let event = webhook::parse_event(body)?;
        if event.event_type != CHECKOUT_COMPLETED {
            return Ok(ignored(format!("event type {}", event.event_type)));
        }

        let object = event.data.object;
        let purpose = match webhook::classify(&object.metadata) {
            Ok(purpose) => purpose,
            Err(reason) => return Ok(ignored(reason)),
        };

        let Some(amount) = object.amount_total else {
            return Ok(ignored("missing amount_total".to_string()));
        };

        match purpose {
            PaymentPurpose::BookedSession { reservation_id } => {
                match self.settle(reservation_id, amount).await {
                    Ok(outcome) => Ok(WebhookOutcome::Settlement(outcome)),
                    Err(e) if e.is_not_found() => {
                        Ok(ignored(format!("reservation {} not found", reservation_id)))
                    }
                    Err(e) => Err(e),
                }
            }
            PaymentPurpose::Subscription {
                account_id,
                audience,
            } => {
                let Some(intent) = object.payment_intent else {
                    return Ok(ignored("subscription without payment_intent".to_string()));
                };
                match self
                    .record_subscription(account_id, audience, &intent, amount, now)
                    .await
                {
                    Ok(outcome) => Ok(WebhookOutcome::SubscriptionRecorded(outcome)),
                    Err(e) if e.is_not_found() => {
                        Ok(ignored(format!("account {} not found", account_id)))
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    /// Replace the deduction policy
    pub async fn replace_policy(
        &self,
        first_engagement: Decimal,
        repeat_engagement: Decimal,
    ) -> Result<DeductionPolicy> {
        let policy = DeductionPolicy::new(first_engagement, repeat_engagement)?;
        self.store
            .writer()
            .put_deduction_policy(policy.clone())
            .await?;
        tracing::info!(
            first_engagement = %policy.first_engagement(),
            repeat_engagement = %policy.repeat_engagement(),
            "Deduction policy replaced"
        );
        Ok(policy)
    }

    /// Current policy, seeding it from configuration when absent
    pub async fn ensure_policy(&self) -> Result<DeductionPolicy> {
        if let Some(policy) = self.policy.current()? {
            return Ok(policy);
        }

        match &self.config.seed_policy {
            Some(SeedPolicy {
                first_engagement,
                repeat_engagement,
            }) => {
                self.replace_policy(*first_engagement, *repeat_engagement)
                    .await
            }
            None => Err(Error::PolicyMissing),
        }
    }

    /// Provider income ledger
    pub fn provider_income(
        &self,
        provider_id: AccountId,
    ) -> Result<IncomeReport<ProviderLedgerEntry>> {
        let entries = self.store.storage().provider_entries(provider_id)?;
        let total_gross = entries.iter().map(|e| e.gross_amount).sum();
        let total_after_deduction = entries.iter().map(|e| e.after_deduction).sum();
        Ok(IncomeReport {
            entries,
            total_gross,
            total_after_deduction,
        })
    }

    /// Platform income ledger
    pub fn platform_income(&self) -> Result<IncomeReport<PlatformLedgerEntry>> {
        let entries = self.store.storage().platform_entries()?;
        let total_gross = entries.iter().map(|e| e.gross_amount).sum();
        let total_after_deduction = entries.iter().map(|e| e.after_deduction).sum();
        Ok(IncomeReport {
            entries,
            total_gross,
            total_after_deduction,
        })
    }
}

fn ignored(reason: String) -> WebhookOutcome {
    tracing::warn!(reason = %reason, "Webhook acknowledged and dropped");
    WebhookOutcome::Ignored { reason }
}
