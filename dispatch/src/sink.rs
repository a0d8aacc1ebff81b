//! Notification sink
//!
//! Notifications are persisted by the event relay and then pushed to the
//! user's room (`user_{id}`) in real time. The two calls fail independently.

use crate::config::RelayConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use booking_core::{AccountId, NotificationRequest};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Notification persisted by the relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Relay-assigned id
    pub id: Uuid,
    /// Recipient
    pub recipient_id: AccountId,
    /// Title
    pub header: String,
    /// Body
    pub detail: String,
    /// Client route opened on click
    pub onclick_location: String,
}

/// Real-time room of a user
pub fn room_for(user_id: AccountId) -> String {
    format!("user_{}", user_id)
}

/// Notification persistence and real-time push
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Persist a notification
    async fn create_notification(&self, request: &NotificationRequest) -> Result<Notification>;

    /// Push an event to a user's room
    async fn emit_realtime(
        &self,
        user_id: AccountId,
        event_name: &str,
        payload: &Notification,
    ) -> Result<()>;
}

#[derive(Serialize)]
struct EmitBody<'a> {
    room: String,
    event: &'a str,
    payload: &'a Notification,
}

/// HTTP client for the event relay process
pub struct RelayNotificationSink {
    client: reqwest::Client,
    config: RelayConfig,
}

impl std::fmt::Debug for RelayNotificationSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayNotificationSink")
            .field("base_url", &self.config.base_url)
            .finish_non_exhaustive()
    }
}

impl RelayNotificationSink {
    /// Create client
    pub fn new(config: RelayConfig) -> Result<Self> {
        if config.base_url.is_empty() {
            return Err(Error::Config("Relay base URL is not set".to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(self.url(path))
            .bearer_auth(&self.config.token)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Relay(format!("{} returned {}: {}", path, status, text)));
        }
        Ok(response)
    }
}

#[async_trait]
impl NotificationSink for RelayNotificationSink {
    async fn create_notification(&self, request: &NotificationRequest) -> Result<Notification> {
        let notification = self
            .post("/notifications/", request)
            .await?
            .json::<Notification>()
            .await?;
        tracing::debug!(notification_id = %notification.id, "Notification persisted");
        Ok(notification)
    }

    async fn emit_realtime(
        &self,
        user_id: AccountId,
        event_name: &str,
        payload: &Notification,
    ) -> Result<()> {
        let body = EmitBody {
            room: room_for(user_id),
            event: event_name,
            payload,
        };
        self.post("/emit/", &body).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_name() {
        let id = Uuid::nil();
        assert_eq!(room_for(id), format!("user_{}", id));
    }

    #[test]
    fn test_relay_response_shape() {
        let id = Uuid::new_v4();
        let recipient = Uuid::new_v4();
        let body = serde_json::json!({
            "id": id,
            "recipient_id": recipient,
            "header": "Upcoming Session",
            "detail": "Starts in 30 minutes",
            "onclick_location": "/booked-sessions/1",
        });
        let notification: Notification = serde_json::from_value(body).unwrap();
        assert_eq!(notification.id, id);
        assert_eq!(notification.recipient_id, recipient);
        assert_eq!(notification.header, "Upcoming Session");
    }

    #[test]
    fn test_relay_requires_url() {
        let config = RelayConfig {
            base_url: String::new(),
            ..RelayConfig::default()
        };
        assert!(matches!(
            RelayNotificationSink::new(config),
            Err(Error::Config(_))
        ));
    }
}
