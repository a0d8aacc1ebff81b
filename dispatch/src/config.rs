//! Configuration for the outbox worker, reminder scanner and relay client

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Dispatch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Outbox worker settings
    pub outbox: OutboxConfig,

    /// Reminder scanner settings
    pub reminders: ReminderConfig,

    /// Event relay settings
    pub relay: RelayConfig,
}

/// Outbox worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxConfig {
    /// Poll interval (milliseconds)
    pub poll_interval_ms: u64,

    /// Entries taken per poll
    pub batch_size: usize,

    /// Delivery attempts before dead-lettering
    pub max_attempts: u32,

    /// First retry delay (seconds)
    pub backoff_base_secs: i64,

    /// Longest retry delay (seconds)
    pub backoff_cap_secs: i64,
}

/// Reminder scanner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderConfig {
    /// Scan interval (seconds)
    pub interval_secs: u64,

    /// Minutes before the session the reminder targets
    pub lead_minutes: i64,

    /// Half width of the scan window (minutes)
    pub tolerance_minutes: i64,
}

/// Event relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Relay base URL
    pub base_url: String,

    /// Bearer token
    pub token: String,

    /// Request timeout (seconds)
    pub timeout_secs: u64,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            batch_size: 32,
            max_attempts: 3,
            backoff_base_secs: 10,
            backoff_cap_secs: 300,
        }
    }
}

impl OutboxConfig {
    /// Poll interval as a duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Delay before retry number `attempts` (1-based)
    pub fn backoff(&self, attempts: u32) -> chrono::Duration {
        let exponent = attempts.saturating_sub(1).min(16);
        let secs = self
            .backoff_base_secs
            .saturating_mul(1i64 << exponent)
            .min(self.backoff_cap_secs);
        chrono::Duration::seconds(secs)
    }
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            lead_minutes: 30,
            tolerance_minutes: 1,
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8004".to_string(),
            token: String::new(),
            timeout_secs: 5,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            outbox: OutboxConfig::default(),
            reminders: ReminderConfig::default(),
            relay: RelayConfig::default(),
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

        if let Ok(url) = std::env::var("NOTIFICATION_RELAY_URL") {
            config.relay.base_url = url;
        }

        if let Ok(token) = std::env::var("NOTIFICATION_RELAY_TOKEN") {
            config.relay.token = token;
        }

        if let Ok(attempts) = std::env::var("OUTBOX_MAX_ATTEMPTS") {
            config.outbox.max_attempts = attempts
                .parse()
                .map_err(|e| crate::Error::Config(format!("Invalid OUTBOX_MAX_ATTEMPTS: {}", e)))?;
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
        assert_eq!(config.outbox.max_attempts, 3);
        assert_eq!(config.reminders.interval_secs, 60);
        assert_eq!(config.reminders.lead_minutes, 30);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let outbox = OutboxConfig::default();
        assert_eq!(outbox.backoff(1), chrono::Duration::seconds(10));
        assert_eq!(outbox.backoff(2), chrono::Duration::seconds(20));
        assert_eq!(outbox.backoff(3), chrono::Duration::seconds(40));
        assert_eq!(outbox.backoff(40), chrono::Duration::seconds(300));
    }
}
