//! Outgoing mail

use crate::Result;
use async_trait::async_trait;
use booking_core::EmailMessage;

/// Email delivery
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Send one message
    async fn send(&self, email: &EmailMessage) -> Result<()>;
}

/// Writes messages to the log instead of sending them
#[derive(Debug, Clone, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &EmailMessage) -> Result<()> {
        tracing::info!(
            to = %email.to,
            kind = ?email.kind,
            subject = %email.subject,
            "Email sent"
        );
        Ok(())
    }
}
