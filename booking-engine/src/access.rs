//! Media access policy
//!
//! A session's media token is only issued to one of its two parties, and
//! only inside `[start - lead, start + duration]`. The token lives for the
//! session's duration.

use crate::{Error, Result};
use async_trait::async_trait;
use booking_core::{AccountId, Reservation, ReservationId, Store};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use std::sync::Arc;

type HmacSha256 = Hmac<Sha256>;

/// Role a participant joins the media channel with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaRole {
    /// Can publish audio and video
    Host,
    /// Receive only
    Audience,
}

impl MediaRole {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaRole::Host => "host",
            MediaRole::Audience => "audience",
        }
    }
}

/// Issues tokens for the real-time media provider
#[async_trait]
pub trait MediaTokenIssuer: Send + Sync {
    /// Token granting `role` on `channel_name` for `ttl_seconds`
    async fn issue_session_token(
        &self,
        channel_name: &str,
        role: MediaRole,
        ttl_seconds: u64,
    ) -> Result<String>;
}

/// Signs `channel|role|expiry` with HMAC-SHA256
///
/// Token format: `hex(channel|role|expiry).hex(mac)`.
pub struct HmacTokenIssuer {
    secret: Vec<u8>,
}

impl HmacTokenIssuer {
    /// Create issuer; the secret must not be empty
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self> {
        let secret = secret.as_ref().to_vec();
        if secret.is_empty() {
            return Err(Error::Config("Media token secret is not set".to_string()));
        }
        Ok(Self { secret })
    }

    fn sign(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| Error::MediaToken(e.to_string()))?;
        mac.update(payload);
        Ok(mac.finalize().into_bytes().to_vec())
    }

    fn token_at(
        &self,
        channel_name: &str,
        role: MediaRole,
        ttl_seconds: u64,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let ttl = i64::try_from(ttl_seconds)
            .map_err(|_| Error::MediaToken("TTL out of range".to_string()))?;
        let expiry = now.timestamp() + ttl;
        let payload = format!("{}|{}|{}", channel_name, role.as_str(), expiry);
        let mac = self.sign(payload.as_bytes())?;
        Ok(format!("{}.{}", hex::encode(payload), hex::encode(mac)))
    }

    /// Verify a token and return `(channel, role, expiry)`
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<(String, String, i64)> {
        let invalid = || Error::Forbidden("Invalid media token".to_string());

        let (payload_hex, mac_hex) = token.split_once('.').ok_or_else(invalid)?;
        let payload = hex::decode(payload_hex).map_err(|_| invalid())?;
        let mac = hex::decode(mac_hex).map_err(|_| invalid())?;

        let mut verifier = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| Error::MediaToken(e.to_string()))?;
        verifier.update(&payload);
        verifier.verify_slice(&mac).map_err(|_| invalid())?;

        let payload = String::from_utf8(payload).map_err(|_| invalid())?;
        let mut parts = payload.rsplitn(3, '|');
        let expiry: i64 = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(invalid)?;
        let role = parts.next().ok_or_else(invalid)?.to_string();
        let channel = parts.next().ok_or_else(invalid)?.to_string();

        if now.timestamp() > expiry {
            return Err(Error::Forbidden("Media token expired".to_string()));
        }
        Ok((channel, role, expiry))
    }
}

#[async_trait]
impl MediaTokenIssuer for HmacTokenIssuer {
    async fn issue_session_token(
        &self,
        channel_name: &str,
        role: MediaRole,
        ttl_seconds: u64,
    ) -> Result<String> {
        self.token_at(channel_name, role, ttl_seconds, Utc::now())
    }
}

/// Issued media grant
#[derive(Debug, Clone, Serialize)]
pub struct MediaGrant {
    /// Reservation
    pub reservation_id: ReservationId,
    /// Channel to join
    pub channel_name: String,
    /// Role granted
    pub role: MediaRole,
    /// Token
    pub token: String,
    /// Token lifetime
    pub ttl_seconds: u64,
}

/// Checks the access window before asking the issuer for a token
pub fn check_access(
    reservation: &Reservation,
    requester: AccountId,
    now: DateTime<Utc>,
    lead: Duration,
) -> Result<()> {
    if !reservation.is_party(requester) {
        return Err(Error::Forbidden(
            "You are not a participant of this session".to_string(),
        ));
    }

    let (opens, closes) = reservation.access_window(lead);
    if now < opens {
        return Err(Error::Forbidden(
            "You can only join the session at the scheduled time.".to_string(),
        ));
    }
    if now > closes {
        return Err(Error::Forbidden("This session has already ended.".to_string()));
    }

    if reservation.channel_name.is_empty() {
        return Err(Error::Validation(
            "Session has no channel name".to_string(),
        ));
    }

    Ok(())
}

/// Media access service
pub struct MediaAccess {
    store: Arc<Store>,
    issuer: Arc<dyn MediaTokenIssuer>,
    lead: Duration,
}

impl MediaAccess {
    /// Create service
    pub fn new(store: Arc<Store>, issuer: Arc<dyn MediaTokenIssuer>, lead: Duration) -> Self {
        Self {
            store,
            issuer,
            lead,
        }
    }

    /// Token for `requester` on a reservation, at `now`
    pub async fn issue_media_token(
        &self,
        reservation_id: ReservationId,
        requester: AccountId,
        now: DateTime<Utc>,
    ) -> Result<MediaGrant> {
        let reservation = self
            .store
            .storage()
            .find_reservation(reservation_id)?
            .ok_or_else(|| Error::NotFound("Session not found".to_string()))?;

        check_access(&reservation, requester, now, self.lead)?;

        let ttl_seconds = u64::from(reservation.duration_minutes) * 60;
        let role = MediaRole::Host;
        let token = self
            .issuer
            .issue_session_token(&reservation.channel_name, role, ttl_seconds)
            .await?;

        tracing::info!(
            reservation_id = %reservation.id,
            requester = %requester,
            ttl_seconds,
            "Media token issued"
        );

        Ok(MediaGrant {
            reservation_id: reservation.id,
            channel_name: reservation.channel_name,
            role,
            token,
            ttl_seconds,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn reservation(start: DateTime<Utc>, provider: AccountId, consumer: AccountId) -> Reservation {
        Reservation {
            id: Uuid::new_v4(),
            offering_id: None,
            provider_id: Some(provider),
            consumer_id: Some(consumer),
            channel_name: "coach_lee_a1b2c3".to_string(),
            scheduled_start: start,
            duration_minutes: 60,
            paid: true,
            reminder_sent: false,
            notification_reminder_sent: false,
            checkout_session_id: None,
            created_at: start,
            paid_at: None,
        }
    }

    #[test]
    fn test_access_window_edges() {
        let start = Utc::now();
        let (provider, consumer) = (Uuid::new_v4(), Uuid::new_v4());
        let r = reservation(start, provider, consumer);
        let lead = Duration::seconds(15);

        assert!(matches!(
            check_access(&r, consumer, start - Duration::seconds(20), lead),
            Err(Error::Forbidden(_))
        ));
        assert!(check_access(&r, consumer, start - Duration::seconds(10), lead).is_ok());
        assert!(check_access(&r, provider, start + Duration::minutes(60), lead).is_ok());
        assert!(matches!(
            check_access(
                &r,
                consumer,
                start + Duration::minutes(60) + Duration::seconds(1),
                lead
            ),
            Err(Error::Forbidden(_))
        ));
    }

    #[test]
    fn test_outsider_forbidden() {
        let start = Utc::now();
        let r = reservation(start, Uuid::new_v4(), Uuid::new_v4());
        assert!(matches!(
            check_access(&r, Uuid::new_v4(), start, Duration::seconds(15)),
            Err(Error::Forbidden(_))
        ));
    }

    #[test]
    fn test_hmac_token_roundtrip_and_tamper() {
        let issuer = HmacTokenIssuer::new("media-secret").unwrap();
        let now = Utc::now();
        let token = issuer
            .token_at("coach_lee_a1b2c3", MediaRole::Host, 3600, now)
            .unwrap();

        let (channel, role, expiry) = issuer.verify(&token, now).unwrap();
        assert_eq!(channel, "coach_lee_a1b2c3");
        assert_eq!(role, "host");
        assert_eq!(expiry, now.timestamp() + 3600);

        assert!(issuer
            .verify(&token, now + Duration::seconds(3601))
            .is_err());

        let other = HmacTokenIssuer::new("other-secret").unwrap();
        assert!(other.verify(&token, now).is_err());
    }

    #[test]
    fn test_empty_secret_rejected() {
        assert!(HmacTokenIssuer::new("").is_err());
    }
}
