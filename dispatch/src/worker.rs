//! Outbox delivery worker
//!
//! Drains due outbox entries in key order (due time, then id). Each entry is
//! delivered at most `max_attempts` times with exponential backoff before it
//! moves to the dead-letter column family.
//!
//! A `Notify` effect is two calls: persist, then emit. When the persist
//! succeeds and the emit fails the entry is rewritten as a `Realtime` effect
//! so the retry does not persist the notification twice.

use crate::config::OutboxConfig;
use crate::mailer::Mailer;
use crate::sink::{Notification, NotificationSink};
use crate::{Error, Result};
use booking_core::types::NOTIFICATION_EVENT;
use booking_core::{Effect, OutboxEntry, RealtimeEvent, Store};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::watch;

/// What happened to one entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Delivered and removed
    Delivered,
    /// Failed, scheduled again
    Retried,
    /// Failed for the last time
    DeadLettered,
}

/// Counts for one drain pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Delivered entries
    pub delivered: usize,
    /// Rescheduled entries
    pub retried: usize,
    /// Dead-lettered entries
    pub dead_lettered: usize,
}

struct Failure {
    error: Error,
    remaining: Option<Effect>,
}

impl From<Error> for Failure {
    fn from(error: Error) -> Self {
        Self {
            error,
            remaining: None,
        }
    }
}

/// Outbox worker
pub struct OutboxWorker {
    store: Arc<Store>,
    sink: Arc<dyn NotificationSink>,
    mailer: Arc<dyn Mailer>,
    config: OutboxConfig,
}

impl std::fmt::Debug for OutboxWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboxWorker")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl OutboxWorker {
    /// Create worker
    pub fn new(
        store: Arc<Store>,
        sink: Arc<dyn NotificationSink>,
        mailer: Arc<dyn Mailer>,
        config: OutboxConfig,
    ) -> Self {
        Self {
            store,
            sink,
            mailer,
            config,
        }
    }

    /// Poll until `shutdown` flips to true
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            poll_interval_ms = self.config.poll_interval_ms,
            max_attempts = self.config.max_attempts,
            "Outbox worker started"
        );

        let mut interval = tokio::time::interval(self.config.poll_interval());
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.drain_once(Utc::now()).await {
                        tracing::error!(error = %e, "Outbox drain failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Outbox worker stopped");
    }

    /// Deliver every entry due at `now`
    pub async fn drain_once(&self, now: DateTime<Utc>) -> Result<DrainReport> {
        let due = self
            .store
            .storage()
            .due_outbox(now, self.config.batch_size)?;

        let mut report = DrainReport::default();
        for entry in due {
            match self.process(entry, now).await? {
                DeliveryOutcome::Delivered => report.delivered += 1,
                DeliveryOutcome::Retried => report.retried += 1,
                DeliveryOutcome::DeadLettered => report.dead_lettered += 1,
            }
        }
        Ok(report)
    }

    async fn process(&self, entry: OutboxEntry, now: DateTime<Utc>) -> Result<DeliveryOutcome> {
        let label = entry.effect.label();
        let metrics = self.store.metrics();

        let failure = match self.deliver(&entry.effect).await {
            Ok(()) => {
                metrics.record_delivery(label, true);
                self.store.writer().complete_outbox(entry).await?;
                return Ok(DeliveryOutcome::Delivered);
            }
            Err(failure) => failure,
        };
        metrics.record_delivery(label, false);

        let mut next = entry.clone();
        next.attempts += 1;
        next.last_error = Some(failure.error.to_string());
        if let Some(effect) = failure.remaining {
            next.effect = effect;
        }

        if next.attempts >= self.config.max_attempts {
            tracing::error!(
                entry_id = %entry.id,
                effect = label,
                attempts = next.attempts,
                error = %failure.error,
                "Outbox entry dead-lettered"
            );
            metrics.outbox_dead_letters.inc();
            self.store.writer().dead_letter(entry, next).await?;
            return Ok(DeliveryOutcome::DeadLettered);
        }

        next.next_attempt_at = now + self.config.backoff(next.attempts);
        tracing::warn!(
            entry_id = %entry.id,
            effect = label,
            attempts = next.attempts,
            retry_at = %next.next_attempt_at,
            error = %failure.error,
            "Outbox delivery failed"
        );
        self.store.writer().reschedule_outbox(entry, next).await?;
        Ok(DeliveryOutcome::Retried)
    }

    async fn deliver(&self, effect: &Effect) -> std::result::Result<(), Failure> {
        match effect {
            Effect::Email(email) => Ok(self.mailer.send(email).await?),

            Effect::Notify(request) => {
                let notification = self.sink.create_notification(request).await?;
                self.sink
                    .emit_realtime(request.recipient_id, NOTIFICATION_EVENT, &notification)
                    .await
                    .map_err(|error| Failure {
                        error,
                        remaining: Some(Effect::Realtime(RealtimeEvent {
                            user_id: request.recipient_id,
                            event_name: NOTIFICATION_EVENT.to_string(),
                            notification_id: notification.id,
                            notification: request.clone(),
                        })),
                    })
            }

            Effect::Realtime(event) => {
                let payload = Notification {
                    id: event.notification_id,
                    recipient_id: event.notification.recipient_id,
                    header: event.notification.header.clone(),
                    detail: event.notification.detail.clone(),
                    onclick_location: event.notification.onclick_location.clone(),
                };
                Ok(self
                    .sink
                    .emit_realtime(event.user_id, &event.event_name, &payload)
                    .await?)
            }
        }
    }
}
