//! Configuration for the booking engine

use booking_core::availability::DEFAULT_MIN_GAP_MINUTES;
use chrono::{Duration, FixedOffset};
use serde::{Deserialize, Serialize};

/// Booking engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Minimum gap between slots of one provider on one day (minutes)
    pub min_gap_minutes: i64,

    /// Media access opens this many seconds before the start
    pub access_lead_seconds: i64,

    /// Fixed offset of the marketplace's wall clock (minutes east of UTC)
    pub timezone_offset_minutes: i32,

    /// Channel name regeneration attempts on collision
    pub channel_attempts: u32,

    /// Client base URL for checkout redirects
    pub domain_url: String,

    /// Checkout configuration
    pub checkout: CheckoutConfig,

    /// Media token configuration
    pub media: MediaConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_gap_minutes: DEFAULT_MIN_GAP_MINUTES,
            access_lead_seconds: 15,
            timezone_offset_minutes: 0,
            channel_attempts: 5,
            domain_url: "http://localhost:3000".to_string(),
            checkout: CheckoutConfig::default(),
            media: MediaConfig::default(),
        }
    }
}

/// Hosted checkout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutConfig {
    /// Payment provider API base
    pub api_base: String,

    /// Secret API key
    pub secret_key: String,

    /// Lowercase ISO currency
    pub currency: String,

    /// Request timeout (seconds)
    pub timeout_secs: u64,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.stripe.com".to_string(),
            secret_key: String::new(),
            currency: "usd".to_string(),
            timeout_secs: 10,
        }
    }
}

/// Media token configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaConfig {
    /// HMAC signing secret
    pub secret: String,
}

impl EngineConfig {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config: {}", e)))?;
        let config: EngineConfig = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = EngineConfig::default();

        if let Ok(url) = std::env::var("BOOKING_DOMAIN_URL") {
            config.domain_url = url;
        }

        if let Ok(offset) = std::env::var("BOOKING_TZ_OFFSET_MINUTES") {
            config.timezone_offset_minutes = offset.parse().map_err(|_| {
                crate::Error::Config(format!("Invalid BOOKING_TZ_OFFSET_MINUTES: {}", offset))
            })?;
        }

        if let Ok(key) = std::env::var("STRIPE_SECRET_KEY") {
            config.checkout.secret_key = key;
        }

        if let Ok(secret) = std::env::var("MEDIA_TOKEN_SECRET") {
            config.media.secret = secret;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.min_gap_minutes < 0 {
            return Err(crate::Error::Config(
                "min_gap_minutes must not be negative".to_string(),
            ));
        }
        if self.channel_attempts == 0 {
            return Err(crate::Error::Config(
                "channel_attempts must be at least 1".to_string(),
            ));
        }
        self.timezone()?;
        Ok(())
    }

    /// Marketplace wall-clock offset
    pub fn timezone(&self) -> crate::Result<FixedOffset> {
        FixedOffset::east_opt(self.timezone_offset_minutes * 60).ok_or_else(|| {
            crate::Error::Config(format!(
                "Invalid timezone offset: {} minutes",
                self.timezone_offset_minutes
            ))
        })
    }

    /// Access lead as a duration
    pub fn access_lead(&self) -> Duration {
        Duration::seconds(self.access_lead_seconds)
    }

    /// Checkout success URL for a reservation
    pub fn success_url(&self, reservation_id: uuid::Uuid) -> String {
        format!(
            "{}/confirmation?session_id={}",
            self.domain_url.trim_end_matches('/'),
            reservation_id
        )
    }

    /// Checkout cancel URL for a reservation
    pub fn cancel_url(&self, reservation_id: uuid::Uuid) -> String {
        format!(
            "{}/payment-cancel?session_id={}",
            self.domain_url.trim_end_matches('/'),
            reservation_id
        )
    }
}
