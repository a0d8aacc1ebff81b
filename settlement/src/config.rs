//! Configuration for the settlement engine

use serde::{Deserialize, Serialize};

/// Settlement engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Webhook signing secret
    pub webhook_secret: String,

    /// Accepted clock skew for webhook timestamps (seconds)
    pub signature_tolerance_secs: i64,

    /// Parse webhooks whose signature fails verification (debug only)
    pub allow_unverified_webhooks: bool,

    /// Subscription validity (days)
    pub subscription_days: i64,

    /// Deduction policy written at startup when none exists
    pub seed_policy: Option<SeedPolicy>,
}

/// Startup deduction policy seed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedPolicy {
    /// First-engagement percent
    pub first_engagement: rust_decimal::Decimal,
    /// Repeat-engagement percent
    pub repeat_engagement: rust_decimal::Decimal,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            webhook_secret: String::new(),
            signature_tolerance_secs: 300,
            allow_unverified_webhooks: false,
            subscription_days: 30,
            seed_policy: None,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(secret) = std::env::var("STRIPE_WEBHOOK_SECRET") {
            config.webhook_secret = secret;
        }

        if let Ok(flag) = std::env::var("ALLOW_UNVERIFIED_WEBHOOKS") {
            config.allow_unverified_webhooks = matches!(flag.as_str(), "1" | "true" | "yes");
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.signature_tolerance_secs, 300);
        assert_eq!(config.subscription_days, 30);
        assert!(!config.allow_unverified_webhooks);
        assert!(config.seed_policy.is_none());
    }

    #[test]
    fn test_seed_from_toml() {
        let config: Config = toml::from_str(
            r#"
            webhook_secret = "whsec_test"
            signature_tolerance_secs = 60
            allow_unverified_webhooks = false
            subscription_days = 30

            [seed_policy]
            first_engagement = "20.00"
            repeat_engagement = "10.00"
            "#,
        )
        .unwrap();
        let seed = config.seed_policy.unwrap();
        assert_eq!(seed.first_engagement, rust_decimal::Decimal::new(2000, 2));
    }
}
