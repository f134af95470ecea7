//! Request descriptors and counter keys.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::policy::PolicyId;

/// Everything the engine needs to know about an inbound request.
///
/// The identifier has already been resolved by the upstream identity layer,
/// e.g. `api_key:<id>`, `user:<id>` or `ip:<addr>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestDescriptor {
    pub identifier: String,
    pub path: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub origin: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl RequestDescriptor {
    pub fn new(identifier: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            path: path.into(),
            method: default_method(),
            origin: None,
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Network origin of the request.
    ///
    /// Falls back to the address of an `ip:` identifier.
    pub fn origin(&self) -> Option<&str> {
        self.origin
            .as_deref()
            .or_else(|| self.identifier.strip_prefix("ip:"))
    }
}

/// A key that uniquely identifies one counter: a policy, an identifier and a
/// window instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterKey {
    pub policy: PolicyId,
    pub identifier: String,
    /// Window start, epoch seconds
    pub window_start: i64,
}

impl CounterKey {
    pub fn new(policy: PolicyId, identifier: &str, window_start: DateTime<Utc>) -> Self {
        Self {
            policy,
            identifier: identifier.to_string(),
            window_start: window_start.timestamp(),
        }
    }

    /// Convert the counter key to a string representation.
    ///
    /// Format: `{policy}|{identifier}|{window_start}`.
    pub fn to_string_key(&self) -> String {
        format!("{}|{}|{}", self.policy, self.identifier, self.window_start)
    }
}

impl std::fmt::Display for CounterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_string_key())
    }
}
