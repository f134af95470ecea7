//! Violation recording on the request path.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{trace, warn};

use super::record::ViolationRecord;
use super::store::ViolationStore;

/// Writes one record per denial and hands it to the alert worker.
///
/// Each write is a single attempt bounded by a timeout. A failed or slow write
/// is logged and dropped; the admission decision has already been made.
#[derive(Clone)]
pub struct ViolationRecorder {
    store: Arc<dyn ViolationStore>,
    alerts: Option<mpsc::Sender<ViolationRecord>>,
    write_timeout: Duration,
}

impl ViolationRecorder {
    pub fn new(store: Arc<dyn ViolationStore>, write_timeout: Duration) -> Self {
        Self {
            store,
            alerts: None,
            write_timeout,
        }
    }

    /// Forward every recorded violation to an alert worker.
    pub fn with_alerts(mut self, alerts: mpsc::Sender<ViolationRecord>) -> Self {
        self.alerts = Some(alerts);
        self
    }

    pub fn store(&self) -> &Arc<dyn ViolationStore> {
        &self.store
    }

    /// Record a violation. Never fails, never retries.
    pub async fn record(&self, record: ViolationRecord) {
        let id = record.id;
        match tokio::time::timeout(self.write_timeout, self.store.append(record.clone())).await {
            Ok(Ok(())) => trace!(violation_id = %id, "Violation recorded"),
            Ok(Err(e)) => {
                warn!(violation_id = %id, policy = %record.policy_name, error = %e, "Failed to record violation");
            }
            Err(_) => {
                warn!(
                    violation_id = %id,
                    policy = %record.policy_name,
                    timeout_ms = self.write_timeout.as_millis() as u64,
                    "Violation write timed out"
                );
            }
        }

        if let Some(alerts) = &self.alerts {
            if let Err(e) = alerts.try_send(record) {
                warn!(violation_id = %id, error = %e, "Alert queue unavailable, violation not evaluated");
            }
        }
    }
}
