//! Session reminder scanner
//!
//! Every scan looks at paid reservations starting `lead ± tolerance` minutes
//! from now. Each reminder flag is claimed by the store writer in the same
//! batch as the outbox effects it produces, so overlapping scans and
//! restarts never enqueue a reminder twice.

use crate::config::ReminderConfig;
use crate::Result;
use booking_core::{
    Account, Effect, EmailKind, EmailMessage, NotificationRequest, ReminderKind, Reservation,
    Store,
};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::watch;

/// Counts for one scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Reservations whose email reminders were enqueued
    pub emails: usize,
    /// Reservations whose notification reminders were enqueued
    pub notifications: usize,
}

/// Reminder scanner
#[derive(Debug)]
pub struct ReminderScanner {
    store: Arc<Store>,
    config: ReminderConfig,
}

impl ReminderScanner {
    /// Create scanner
    pub fn new(store: Arc<Store>, config: ReminderConfig) -> Self {
        Self { store, config }
    }

    /// Scan until `shutdown` flips to true
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(interval_secs = self.config.interval_secs, "Reminder scanner started");

        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(self.config.interval_secs));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.scan_once(Utc::now()).await {
                        Ok(report) if report.emails + report.notifications > 0 => {
                            tracing::info!(
                                emails = report.emails,
                                notifications = report.notifications,
                                "Session reminders enqueued"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!(error = %e, "Reminder scan failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Reminder scanner stopped");
    }

    /// One pass over the reminder window at `now`
    pub async fn scan_once(&self, now: DateTime<Utc>) -> Result<ScanReport> {
        let lead = Duration::minutes(self.config.lead_minutes);
        let tolerance = Duration::minutes(self.config.tolerance_minutes);
        let candidates = self
            .store
            .storage()
            .reservations_starting_between(now + lead - tolerance, now + lead + tolerance)?;

        let mut report = ScanReport::default();
        for reservation in candidates.into_iter().filter(|r| r.paid) {
            if reservation.reminder_sent && reservation.notification_reminder_sent {
                continue;
            }

            let Some((provider, consumer)) = self.parties(&reservation)? else {
                tracing::warn!(reservation_id = %reservation.id, "Reminder skipped, party missing");
                continue;
            };

            if !reservation.reminder_sent {
                let effects = reminder_emails(&reservation, &provider, &consumer);
                if self
                    .store
                    .writer()
                    .claim_reminder(reservation.id, ReminderKind::Email, effects)
                    .await?
                {
                    report.emails += 1;
                }
            }

            if !reservation.notification_reminder_sent {
                let effects = reminder_notifications(&reservation, &provider, &consumer);
                if self
                    .store
                    .writer()
                    .claim_reminder(reservation.id, ReminderKind::Notification, effects)
                    .await?
                {
                    report.notifications += 1;
                }
            }
        }

        Ok(report)
    }

    fn parties(&self, reservation: &Reservation) -> Result<Option<(Account, Account)>> {
        let (Some(provider_id), Some(consumer_id)) = (reservation.provider_id, reservation.consumer_id)
        else {
            return Ok(None);
        };
        let storage = self.store.storage();
        Ok(storage
            .find_account(provider_id)?
            .zip(storage.find_account(consumer_id)?))
    }
}

/// Reminder emails to both parties
pub fn reminder_emails(
    reservation: &Reservation,
    provider: &Account,
    consumer: &Account,
) -> Vec<Effect> {
    let when = reservation.scheduled_start.format("%Y-%m-%d %H:%M UTC");
    [(provider, consumer), (consumer, provider)]
        .into_iter()
        .map(|(to, other)| {
            Effect::Email(EmailMessage {
                kind: EmailKind::SessionReminder,
                to: to.email.clone(),
                subject: "Your session starts in 30 minutes".to_string(),
                body: format!(
                    "Hi {}, your session with {} starts at {}.",
                    to.name(),
                    other.name(),
                    when
                ),
            })
        })
        .collect()
}

/// Reminder notifications to both parties
pub fn reminder_notifications(
    reservation: &Reservation,
    provider: &Account,
    consumer: &Account,
) -> Vec<Effect> {
    let when = reservation.scheduled_start.format("%H:%M UTC");
    vec![
        Effect::Notify(NotificationRequest {
            recipient_id: provider.id,
            header: "Session Reminder".to_string(),
            detail: format!("Your session with {} starts at {}", consumer.name(), when),
            onclick_location: format!("/teacher/booked-sessions/{}", reservation.id),
        }),
        Effect::Notify(NotificationRequest {
            recipient_id: consumer.id,
            header: "Session Reminder".to_string(),
            detail: format!("Your session with {} starts at {}", provider.name(), when),
            onclick_location: format!("/booked-sessions/{}", reservation.id),
        }),
    ]
}
