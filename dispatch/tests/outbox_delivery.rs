//! Outbox worker and reminder scanner against a real store
//!
//! - Failing deliveries back off and dead-letter after the last attempt
//! - A failed emit after a successful persist retries the emit only
//! - Reminder flags stop repeated scans from enqueueing twice

use async_trait::async_trait;
use booking_core::{
    Account, AccountId, Config as StoreConfig, Effect, EmailKind, EmailMessage,
    NotificationRequest, Reservation, Role, Store,
};
use chrono::{DateTime, Duration, Utc};
use dispatch::{
    Error, LogMailer, Notification, NotificationSink, OutboxConfig, OutboxWorker, ReminderConfig,
    ReminderScanner,
};
use parking_lot::Mutex;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Default)]
struct FlakySink {
    create_failures: Mutex<u32>,
    emit_failures: Mutex<u32>,
    created: Mutex<Vec<Notification>>,
    emitted: Mutex<Vec<(AccountId, String, Uuid)>>,
}

#[async_trait]
impl NotificationSink for FlakySink {
    async fn create_notification(
        &self,
        request: &NotificationRequest,
    ) -> dispatch::Result<Notification> {
        let mut failures = self.create_failures.lock();
        if *failures > 0 {
            *failures -= 1;
            return Err(Error::Relay("relay unavailable".to_string()));
        }
        let notification = Notification {
            id: Uuid::new_v4(),
            recipient_id: request.recipient_id,
            header: request.header.clone(),
            detail: request.detail.clone(),
            onclick_location: request.onclick_location.clone(),
        };
        self.created.lock().push(notification.clone());
        Ok(notification)
    }

    async fn emit_realtime(
        &self,
        user_id: AccountId,
        event_name: &str,
        payload: &Notification,
    ) -> dispatch::Result<()> {
        let mut failures = self.emit_failures.lock();
        if *failures > 0 {
            *failures -= 1;
            return Err(Error::Relay("socket down".to_string()));
        }
        self.emitted
            .lock()
            .push((user_id, event_name.to_string(), payload.id));
        Ok(())
    }
}

async fn open_store() -> (Arc<Store>, tempfile::TempDir) {
    let temp = tempfile::tempdir().unwrap();
    let mut config = StoreConfig::default();
    config.data_dir = temp.path().to_path_buf();
    (Arc::new(Store::open(config).await.unwrap()), temp)
}

fn worker(store: &Arc<Store>, sink: &Arc<FlakySink>) -> OutboxWorker {
    OutboxWorker::new(
        store.clone(),
        sink.clone(),
        Arc::new(LogMailer),
        OutboxConfig::default(),
    )
}

fn notify(recipient: AccountId) -> Effect {
    Effect::Notify(NotificationRequest {
        recipient_id: recipient,
        header: "New Session Booked".to_string(),
        detail: "lee booked a virtual session".to_string(),
        onclick_location: "/teacher/booked-sessions/1".to_string(),
    })
}

#[tokio::test]
async fn delivers_notifications_and_emails() {
    let (store, _temp) = open_store().await;
    let sink = Arc::new(FlakySink::default());
    let recipient = Uuid::new_v4();
    let now = Utc::now();

    let email = Effect::Email(EmailMessage {
        kind: EmailKind::SessionBooked,
        to: "coach@example.com".to_string(),
        subject: "New booking".to_string(),
        body: "lee booked a session".to_string(),
    });
    store
        .storage()
        .enqueue(&[notify(recipient), email], now)
        .unwrap();

    let report = worker(&store, &sink).drain_once(now).await.unwrap();
    assert_eq!(report.delivered, 2);
    assert!(store.storage().pending_outbox().unwrap().is_empty());

    let emitted = sink.emitted.lock().clone();
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].0, recipient);
    assert_eq!(emitted[0].1, "send_notification");
    assert_eq!(emitted[0].2, sink.created.lock()[0].id);
}

#[tokio::test]
async fn failing_delivery_is_dead_lettered_after_three_attempts() {
    let (store, _temp) = open_store().await;
    let sink = Arc::new(FlakySink::default());
    *sink.create_failures.lock() = u32::MAX;
    let worker = worker(&store, &sink);
    let now = Utc::now();

    store.storage().enqueue(&[notify(Uuid::new_v4())], now).unwrap();

    let first = worker.drain_once(now).await.unwrap();
    assert_eq!(first.retried, 1);
    let pending = store.storage().pending_outbox().unwrap();
    assert_eq!(pending[0].attempts, 1);
    assert_eq!(pending[0].next_attempt_at, now + Duration::seconds(10));
    assert!(pending[0].last_error.as_deref().unwrap().contains("relay unavailable"));

    // Not due yet
    let idle = worker.drain_once(now + Duration::seconds(5)).await.unwrap();
    assert_eq!(idle, dispatch::DrainReport::default());

    let second = worker.drain_once(now + Duration::seconds(10)).await.unwrap();
    assert_eq!(second.retried, 1);
    let pending = store.storage().pending_outbox().unwrap();
    assert_eq!(pending[0].next_attempt_at, now + Duration::seconds(30));

    let third = worker.drain_once(now + Duration::seconds(30)).await.unwrap();
    assert_eq!(third.dead_lettered, 1);
    assert!(store.storage().pending_outbox().unwrap().is_empty());

    let dead = store.storage().dead_letters().unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].attempts, 3);
    assert_eq!(store.metrics().outbox_dead_letters.get(), 1);
}

#[tokio::test]
async fn emit_failure_retries_realtime_only() {
    let (store, _temp) = open_store().await;
    let sink = Arc::new(FlakySink::default());
    *sink.emit_failures.lock() = 1;
    let worker = worker(&store, &sink);
    let now = Utc::now();
    let recipient = Uuid::new_v4();

    store.storage().enqueue(&[notify(recipient)], now).unwrap();

    let first = worker.drain_once(now).await.unwrap();
    assert_eq!(first.retried, 1);
    assert_eq!(sink.created.lock().len(), 1);

    let pending = store.storage().pending_outbox().unwrap();
    let Effect::Realtime(event) = &pending[0].effect else {
        panic!("expected a realtime retry, got {:?}", pending[0].effect);
    };
    assert_eq!(event.user_id, recipient);
    assert_eq!(event.notification_id, sink.created.lock()[0].id);

    let second = worker
        .drain_once(now + Duration::seconds(10))
        .await
        .unwrap();
    assert_eq!(second.delivered, 1);
    assert_eq!(sink.created.lock().len(), 1);
    assert_eq!(sink.emitted.lock().len(), 1);
    assert!(store.storage().pending_outbox().unwrap().is_empty());
}

fn paid_reservation(
    provider: &Account,
    consumer: &Account,
    start: DateTime<Utc>,
    paid: bool,
) -> Reservation {
    Reservation {
        id: Uuid::new_v4(),
        offering_id: None,
        provider_id: Some(provider.id),
        consumer_id: Some(consumer.id),
        channel_name: format!("{}_{}_{}", provider.handle, consumer.handle, Uuid::new_v4().simple()),
        scheduled_start: start,
        duration_minutes: 60,
        paid,
        reminder_sent: false,
        notification_reminder_sent: false,
        checkout_session_id: Some("cs_test_0001".to_string()),
        created_at: Utc::now(),
        paid_at: if paid { Some(Utc::now()) } else { None },
    }
}

#[tokio::test]
async fn reminders_are_enqueued_once() {
    let (store, _temp) = open_store().await;
    let teacher = Account::new("coach", "Coach Carter", "coach@example.com", Role::Teacher);
    let student = Account::new("lee", "Lee", "lee@example.com", Role::Student);
    store.writer().put_account(teacher.clone()).await.unwrap();
    store.writer().put_account(student.clone()).await.unwrap();

    let now = Utc::now();
    let due = paid_reservation(&teacher, &student, now + Duration::minutes(30), true);
    let unpaid = paid_reservation(&teacher, &student, now + Duration::minutes(30), false);
    let later = paid_reservation(&teacher, &student, now + Duration::minutes(45), true);
    for reservation in [&due, &unpaid, &later] {
        store
            .writer()
            .create_reservation(reservation.clone())
            .await
            .unwrap();
    }

    let scanner = ReminderScanner::new(store.clone(), ReminderConfig::default());
    let report = scanner.scan_once(now).await.unwrap();
    assert_eq!(report.emails, 1);
    assert_eq!(report.notifications, 1);

    let pending = store.storage().pending_outbox().unwrap();
    assert_eq!(pending.len(), 4);
    let emails: Vec<&str> = pending
        .iter()
        .filter_map(|e| match &e.effect {
            Effect::Email(email) => Some(email.to.as_str()),
            _ => None,
        })
        .collect();
    assert!(emails.contains(&"coach@example.com"));
    assert!(emails.contains(&"lee@example.com"));

    let stored = store.storage().get_reservation(due.id).unwrap();
    assert!(stored.reminder_sent);
    assert!(stored.notification_reminder_sent);

    let again = scanner
        .scan_once(now + Duration::seconds(30))
        .await
        .unwrap();
    assert_eq!(again, dispatch::ScanReport::default());
    assert_eq!(store.storage().pending_outbox().unwrap().len(), 4);
    assert!(!store.storage().get_reservation(unpaid.id).unwrap().reminder_sent);
}

#[tokio::test]
async fn worker_stops_on_shutdown() {
    let (store, _temp) = open_store().await;
    let sink = Arc::new(FlakySink::default());
    let (tx, rx) = tokio::sync::watch::channel(false);

    let handle = tokio::spawn(worker(&store, &sink).run(rx));
    tx.send(true).unwrap();
    tokio::time::timeout(std::time::Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
}
