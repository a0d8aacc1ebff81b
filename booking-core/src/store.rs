//! Store facade
//!
//! Ties storage, the writer actor and metrics together. Reads go straight
//! to RocksDB; every mutation goes through the [`StoreHandle`].
//!
//! # Example
//!
//! ```no_run
//! use booking_core::{Config, Store};
//!
//! #[tokio::main]
//! async fn main() -> booking_core::Result<()> {
//!     let store = Store::open(Config::default()).await?;
//!     let policy = store.storage().deduction_policy()?;
//!     println!("policy configured: {}", policy.is_some());
//!     store.shutdown().await
//! }
//! ```

use crate::{
    actor::{spawn_store_actor, StoreHandle},
    metrics::Metrics,
    Config, Result, Storage,
};
use std::sync::Arc;

/// Booking store
#[derive(Debug)]
pub struct Store {
    /// Actor handle for mutations
    handle: StoreHandle,

    /// Direct storage access (for reads)
    storage: Arc<Storage>,

    /// Metrics shared with every engine built on this store
    metrics: Metrics,

    /// Configuration
    config: Config,
}

impl Store {
    /// Open store with configuration
    pub async fn open(config: Config) -> Result<Self> {
        let storage = Arc::new(Storage::open(&config)?);
        let metrics = Metrics::new()?;

        let handle = spawn_store_actor(
            storage.clone(),
            metrics.clone(),
            config.actor.mailbox_capacity,
        );

        tracing::info!(
            service = %config.service_name,
            data_dir = ?config.data_dir,
            "Store opened"
        );

        Ok(Self {
            handle,
            storage,
            metrics,
            config,
        })
    }

    /// Read access
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Write access (serialized through the actor)
    pub fn writer(&self) -> &StoreHandle {
        &self.handle
    }

    /// Metrics
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Stop the writer actor
    pub async fn shutdown(&self) -> Result<()> {
        self.handle.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Account, Role};

    #[tokio::test]
    async fn test_open_write_read() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();

        let store = Store::open(config).await.unwrap();
        let account = Account::new("learner", "Lee Learner", "lee@example.com", Role::Student);
        store.writer().put_account(account.clone()).await.unwrap();

        assert_eq!(store.storage().get_account(account.id).unwrap(), account);
        store.shutdown().await.unwrap();
    }
}
