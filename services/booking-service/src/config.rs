use config::{ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub store: StoreConfig,
    pub booking: BookingConfig,
    pub checkout: CheckoutConfig,
    pub media: MediaConfig,
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    pub relay: RelayConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StoreConfig {
    pub data_dir: String,
    pub mailbox_capacity: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BookingConfig {
    pub domain_url: String,
    pub timezone_offset_minutes: i32,
    pub min_gap_minutes: i64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CheckoutConfig {
    /// `stripe` or `mock`
    pub mode: String,
    pub api_base: String,
    pub secret_key: String,
    pub currency: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MediaConfig {
    pub secret: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WebhookConfig {
    pub secret: String,
    pub tolerance_secs: i64,
    pub allow_unverified: bool,
    pub subscription_days: i64,
}

/// Seed rates, written only when the store has no policy yet
#[derive(Debug, Default, Deserialize, Serialize, Clone)]
pub struct PolicyConfig {
    pub first_engagement: Option<String>,
    pub repeat_engagement: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RelayConfig {
    pub base_url: String,
    pub token: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let builder = config::Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8090)?
            .set_default("server.workers", 4)?
            .set_default("auth.jwt_secret", "")?
            .set_default("store.data_dir", "./data/booking")?
            .set_default("store.mailbox_capacity", 1000)?
            .set_default("booking.domain_url", "http://localhost:3000")?
            .set_default("booking.timezone_offset_minutes", 0)?
            .set_default("booking.min_gap_minutes", 90)?
            .set_default("checkout.mode", "stripe")?
            .set_default("checkout.api_base", "https://api.stripe.com")?
            .set_default("checkout.secret_key", "")?
            .set_default("checkout.currency", "usd")?
            .set_default("media.secret", "")?
            .set_default("webhook.secret", "")?
            .set_default("webhook.tolerance_secs", 300)?
            .set_default("webhook.allow_unverified", false)?
            .set_default("webhook.subscription_days", 30)?
            .set_default("relay.base_url", "http://localhost:8004")?
            .set_default("relay.token", "")?;

        let config_file =
            env::var("CONFIG_FILE").unwrap_or_else(|_| "config/booking-service".to_string());
        let mut builder = builder
            .add_source(File::with_name(&config_file).required(false))
            .add_source(Environment::with_prefix("BOOKING").separator("__"));

        // Secrets shared with the rest of the platform
        for (var, key) in [
            ("JWT_SECRET", "auth.jwt_secret"),
            ("STRIPE_SECRET_KEY", "checkout.secret_key"),
            ("STRIPE_WEBHOOK_SECRET", "webhook.secret"),
            ("MEDIA_TOKEN_SECRET", "media.secret"),
            ("NOTIFICATION_RELAY_TOKEN", "relay.token"),
        ] {
            if let Ok(value) = env::var(var) {
                builder = builder.set_override(key, value)?;
            }
        }

        if let Ok(port) = env::var("BOOKING_SERVICE_PORT") {
            builder = builder.set_override("server.port", port)?;
        }

        builder.build()?.try_deserialize()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("Server port cannot be 0".to_string());
        }

        if self.auth.jwt_secret.is_empty() {
            return Err("JWT secret is required".to_string());
        }

        if self.media.secret.is_empty() {
            return Err("Media token secret is required".to_string());
        }

        if self.checkout.mode == "stripe" && self.checkout.secret_key.is_empty() {
            return Err("Stripe secret key is required".to_string());
        }

        if self.webhook.secret.is_empty() && !self.webhook.allow_unverified {
            return Err("Webhook secret is required".to_string());
        }

        self.engine_config().validate().map_err(|e| e.to_string())?;
        self.seed_policy()?;
        Ok(())
    }

    pub fn store_config(&self) -> booking_core::Config {
        let mut config = booking_core::Config::default();
        config.data_dir = PathBuf::from(&self.store.data_dir);
        config.actor.mailbox_capacity = self.store.mailbox_capacity;
        config
    }

    pub fn engine_config(&self) -> booking_engine::EngineConfig {
        let mut config = booking_engine::EngineConfig::default();
        config.domain_url = self.booking.domain_url.clone();
        config.timezone_offset_minutes = self.booking.timezone_offset_minutes;
        config.min_gap_minutes = self.booking.min_gap_minutes;
        config.checkout.api_base = self.checkout.api_base.clone();
        config.checkout.secret_key = self.checkout.secret_key.clone();
        config.checkout.currency = self.checkout.currency.clone();
        config.media.secret = self.media.secret.clone();
        config
    }

    pub fn settlement_config(&self) -> Result<settlement::Config, String> {
        Ok(settlement::Config {
            webhook_secret: self.webhook.secret.clone(),
            signature_tolerance_secs: self.webhook.tolerance_secs,
            allow_unverified_webhooks: self.webhook.allow_unverified,
            subscription_days: self.webhook.subscription_days,
            seed_policy: self.seed_policy()?,
        })
    }

    pub fn dispatch_config(&self) -> dispatch::Config {
        let mut config = dispatch::Config::default();
        config.relay.base_url = self.relay.base_url.clone();
        config.relay.token = self.relay.token.clone();
        config
    }

    fn seed_policy(&self) -> Result<Option<settlement::SeedPolicy>, String> {
        match (&self.policy.first_engagement, &self.policy.repeat_engagement) {
            (Some(first), Some(repeat)) => Ok(Some(settlement::SeedPolicy {
                first_engagement: parse_rate(first)?,
                repeat_engagement: parse_rate(repeat)?,
            })),
            (None, None) => Ok(None),
            _ => Err("Both policy rates must be set together".to_string()),
        }
    }
}

fn parse_rate(value: &str) -> Result<Decimal, String> {
    Decimal::from_str(value.trim()).map_err(|e| format!("Invalid policy rate {}: {}", value, e))
}
