//! Notification channels for fired alerts.
//!
//! Delivery transports (webhooks, mail, chat) live outside the engine; they plug
//! in by implementing [`Notifier`] and registering under a channel name that
//! alert rules refer to.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use crate::policy::PolicyId;

/// Payload handed to every notification channel of a fired rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub rule_id: u64,
    pub policy_id: Option<PolicyId>,
    /// Policy of the violation that tripped the rule
    pub policy_name: String,
    pub violation_count: u64,
    pub threshold_count: u64,
    pub threshold_window_secs: u64,
    pub identifier: String,
    pub endpoint: String,
    pub triggered_at: DateTime<Utc>,
}

/// A notification channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, alert: &Alert) -> Result<()>;
}

/// Writes alerts to the log. Registered as `log` by default.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, alert: &Alert) -> Result<()> {
        warn!(
            rule_id = alert.rule_id,
            policy = %alert.policy_name,
            violations = alert.violation_count,
            threshold = alert.threshold_count,
            window_secs = alert.threshold_window_secs,
            identifier = %alert.identifier,
            endpoint = %alert.endpoint,
            "Rate limit alert triggered"
        );
        Ok(())
    }
}
