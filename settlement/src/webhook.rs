//! Payment webhook verification and parsing
//!
//! Signature header format: `t=<unix seconds>,v1=<hex>` where the hex value
//! is HMAC-SHA256 over `"<t>.<raw body>"` keyed by the webhook secret.
//! Several `v1` values may be present during secret rotation.

use crate::{Error, Result};
use booking_core::{AccountId, ReservationId, SubscriptionAudience};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Event type that carries a completed checkout
pub const CHECKOUT_COMPLETED: &str = "checkout.session.completed";

/// Webhook event envelope
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    /// Event type
    #[serde(rename = "type")]
    pub event_type: String,

    /// Event payload
    pub data: EventData,
}

/// Event payload wrapper
#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    /// The checkout session
    pub object: CheckoutObject,
}

/// Completed checkout session as delivered by the payment provider
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutObject {
    /// Amount paid in minor units
    #[serde(default)]
    pub amount_total: Option<i64>,

    /// Payment provider transaction id
    #[serde(default)]
    pub payment_intent: Option<String>,

    /// Metadata set at checkout creation
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// What a payment was for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentPurpose {
    /// A booked session
    BookedSession {
        /// Reservation to settle
        reservation_id: ReservationId,
    },
    /// A subscription
    Subscription {
        /// Subscriber
        account_id: AccountId,
        /// Student or teacher plan
        audience: SubscriptionAudience,
    },
}

/// Parse a webhook body
pub fn parse_event(body: &[u8]) -> Result<WebhookEvent> {
    serde_json::from_slice(body).map_err(|e| Error::InvalidPayload(e.to_string()))
}

/// Work out what a checkout paid for
///
/// `Err` carries the reason the event is dropped.
pub fn classify(metadata: &HashMap<String, String>) -> std::result::Result<PaymentPurpose, String> {
    let kind = metadata
        .get("type")
        .ok_or_else(|| "metadata has no type".to_string())?;

    match kind.as_str() {
        "booked_session" => {
            let raw = metadata
                .get("reservation_id")
                .or_else(|| metadata.get("booked_session_id"))
                .ok_or_else(|| "booked_session without reservation_id".to_string())?;
            let reservation_id = parse_id(raw)?;
            Ok(PaymentPurpose::BookedSession { reservation_id })
        }
        "subscription" => {
            let raw = metadata
                .get("student_id")
                .ok_or_else(|| "subscription without student_id".to_string())?;
            Ok(PaymentPurpose::Subscription {
                account_id: parse_id(raw)?,
                audience: SubscriptionAudience::Student,
            })
        }
        "teacher-subscription" => {
            let raw = metadata
                .get("teacher_id")
                .ok_or_else(|| "teacher-subscription without teacher_id".to_string())?;
            Ok(PaymentPurpose::Subscription {
                account_id: parse_id(raw)?,
                audience: SubscriptionAudience::Teacher,
            })
        }
        other => Err(format!("unknown metadata type {}", other)),
    }
}

fn parse_id(raw: &str) -> std::result::Result<Uuid, String> {
    Uuid::parse_str(raw.trim()).map_err(|_| format!("malformed id {}", raw))
}

/// Verify a signature header against the raw body
pub fn verify_signature(
    secret: &str,
    header: &str,
    body: &[u8],
    now_unix: i64,
    tolerance_secs: i64,
) -> Result<()> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp =
        timestamp.ok_or_else(|| Error::InvalidSignature("missing timestamp".to_string()))?;
    if signatures.is_empty() {
        return Err(Error::InvalidSignature("missing v1 signature".to_string()));
    }
    if (now_unix - timestamp).abs() > tolerance_secs {
        return Err(Error::InvalidSignature(format!(
            "timestamp {} outside tolerance",
            timestamp
        )));
    }

    for signature in signatures {
        let Ok(expected) = hex::decode(signature) else {
            continue;
        };
        let mut mac = new_mac(secret)?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(body);
        if mac.verify_slice(&expected).is_ok() {
            return Ok(());
        }
    }

    Err(Error::InvalidSignature("no matching signature".to_string()))
}

/// Build a signature header for `body` at `timestamp`
pub fn sign(secret: &str, timestamp: i64, body: &[u8]) -> Result<String> {
    let mut mac = new_mac(secret)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    Ok(format!(
        "t={},v1={}",
        timestamp,
        hex::encode(mac.finalize().into_bytes())
    ))
}

fn new_mac(secret: &str) -> Result<HmacSha256> {
    HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| Error::Config(format!("Invalid webhook secret: {}", e)))
}
