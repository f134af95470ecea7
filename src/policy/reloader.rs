//! Periodic refresh of the policy store from its source.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::warn;

use super::store::PolicyStore;
use crate::scheduler::PeriodicJob;

/// Reloads every policy from the store's source on each tick.
///
/// A failed reload keeps the previous snapshot in place.
pub struct PolicyReloader {
    store: Arc<PolicyStore>,
}

impl PolicyReloader {
    pub fn new(store: Arc<PolicyStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl PeriodicJob for PolicyReloader {
    fn name(&self) -> &str {
        "policy-reloader"
    }

    async fn run(&self, _now: DateTime<Utc>) {
        if let Err(e) = self.store.reload() {
            warn!(error = %e, "Policy reload failed, keeping previous policies");
        }
    }
}
