//! Violation records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::policy::PolicyId;

/// Which gate rejected the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViolationAction {
    /// The burst allowance was empty
    Burst,
    /// The window limit was reached
    Window,
}

impl std::fmt::Display for ViolationAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationAction::Burst => f.write_str("burst"),
            ViolationAction::Window => f.write_str("window"),
        }
    }
}

/// One denied request. Written once, never modified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolationRecord {
    pub id: Uuid,
    pub policy_id: PolicyId,
    pub policy_name: String,
    pub identifier: String,
    pub endpoint: String,
    pub method: String,
    pub origin: Option<String>,
    pub window_start: DateTime<Utc>,
    /// Requests counted in the window, including the rejected one
    pub observed_count: u64,
    /// How far the rejected request went past the limit
    pub over_limit: u64,
    pub action: ViolationAction,
    pub timestamp: DateTime<Utc>,
}

/// Filter for reading back violations.
#[derive(Debug, Clone, Default)]
pub struct ViolationQuery {
    pub policy_id: Option<PolicyId>,
    pub identifier: Option<String>,
    /// Inclusive lower bound on the timestamp
    pub since: Option<DateTime<Utc>>,
    /// Exclusive upper bound on the timestamp
    pub until: Option<DateTime<Utc>>,
    /// Keep only the most recent N matches
    pub limit: Option<usize>,
}

impl ViolationQuery {
    pub fn for_policy(policy_id: PolicyId) -> Self {
        Self {
            policy_id: Some(policy_id),
            ..Self::default()
        }
    }

    pub fn between(mut self, since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self.until = Some(until);
        self
    }

    pub fn matches(&self, record: &ViolationRecord) -> bool {
        self.policy_id.map_or(true, |id| record.policy_id == id)
            && self
                .identifier
                .as_deref()
                .map_or(true, |i| record.identifier == i)
            && self.since.map_or(true, |s| record.timestamp >= s)
            && self.until.map_or(true, |u| record.timestamp < u)
    }
}
