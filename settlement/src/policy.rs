//! Deduction policy source
//!
//! The settlement engine reads the policy once per settle call through
//! [`PolicyRepository`]. Writes happen only through operator paths.

use crate::Result;
use booking_core::{DeductionPolicy, Store};
use std::sync::Arc;

/// Where the current deduction policy comes from
pub trait PolicyRepository: Send + Sync {
    /// Current policy, if configured
    fn current(&self) -> Result<Option<DeductionPolicy>>;
}

/// Policy persisted in the store's settings
#[derive(Debug)]
pub struct StorePolicyRepository {
    store: Arc<Store>,
}

impl StorePolicyRepository {
    /// Create repository
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }
}

impl PolicyRepository for StorePolicyRepository {
    fn current(&self) -> Result<Option<DeductionPolicy>> {
        Ok(self.store.storage().deduction_policy()?)
    }
}

/// Constant policy
#[derive(Debug, Clone)]
pub struct FixedPolicy(pub DeductionPolicy);

impl PolicyRepository for FixedPolicy {
    fn current(&self) -> Result<Option<DeductionPolicy>> {
        Ok(Some(self.0.clone()))
    }
}
