//! Policy definitions.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{GatekeeperError, Result};
use crate::ratelimit::WindowKind;

/// Stable identifier of a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PolicyId(pub u64);

impl std::fmt::Display for PolicyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a policy is scoped to.
///
/// Serialized as `{ type: endpoint, value: "/api/*" }`; `global` carries no value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Target {
    /// Applies to every request
    Global,
    /// Caller identifier, exact or glob (`api_key:*`)
    Caller(String),
    /// Request path glob
    Endpoint(String),
    /// Network origin, exact address or CIDR prefix
    Origin(String),
}

impl Target {
    pub fn kind(&self) -> TargetKind {
        match self {
            Target::Global => TargetKind::Global,
            Target::Caller(_) => TargetKind::Caller,
            Target::Endpoint(_) => TargetKind::Endpoint,
            Target::Origin(_) => TargetKind::Origin,
        }
    }

    pub fn value(&self) -> Option<&str> {
        match self {
            Target::Global => None,
            Target::Caller(v) | Target::Endpoint(v) | Target::Origin(v) => Some(v),
        }
    }
}

/// Scope type of a [`Target`], used for store queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind {
    Global,
    Caller,
    Endpoint,
    Origin,
}

/// Token bucket parameters layered over the window limit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BurstConfig {
    /// Bucket capacity
    pub max_tokens: u32,
    /// Seconds to refill an empty bucket completely
    pub refill_window_secs: u64,
}

impl BurstConfig {
    /// Tokens added per second.
    pub fn refill_rate(&self) -> f64 {
        self.max_tokens as f64 / self.refill_window_secs as f64
    }
}

/// A named admission policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub id: PolicyId,
    pub name: String,
    pub target: Target,
    pub window: WindowKind,
    /// Requests admitted per window
    pub limit: u64,
    #[serde(default)]
    pub burst: Option<BurstConfig>,
    /// Limit overrides keyed by upper-case HTTP method
    #[serde(default)]
    pub method_limits: HashMap<String, u64>,
    #[serde(default)]
    pub include_endpoints: Vec<String>,
    #[serde(default)]
    pub exclude_endpoints: Vec<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl Policy {
    /// Create an active global policy with no burst, overrides or filters.
    pub fn new(id: u64, name: impl Into<String>, target: Target, window: WindowKind, limit: u64) -> Self {
        Self {
            id: PolicyId(id),
            name: name.into(),
            target,
            window,
            limit,
            burst: None,
            method_limits: HashMap::new(),
            include_endpoints: Vec::new(),
            exclude_endpoints: Vec::new(),
            priority: 0,
            active: true,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_burst(mut self, max_tokens: u32, refill_window_secs: u64) -> Self {
        self.burst = Some(BurstConfig {
            max_tokens,
            refill_window_secs,
        });
        self
    }

    pub fn with_method_limit(mut self, method: &str, limit: u64) -> Self {
        self.method_limits.insert(method.to_ascii_uppercase(), limit);
        self
    }

    pub fn with_include(mut self, pattern: &str) -> Self {
        self.include_endpoints.push(pattern.to_string());
        self
    }

    pub fn with_exclude(mut self, pattern: &str) -> Self {
        self.exclude_endpoints.push(pattern.to_string());
        self
    }

    /// Limit that applies to `method`, falling back to the base limit.
    pub fn limit_for(&self, method: &str) -> u64 {
        self.method_limits
            .get(&method.to_ascii_uppercase())
            .copied()
            .unwrap_or(self.limit)
    }

    /// Check the write-time invariants of a policy.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(GatekeeperError::invalid_policy(&self.name, "name must not be empty"));
        }
        if self.limit == 0 {
            return Err(GatekeeperError::invalid_policy(
                &self.name,
                "limit must be greater than zero",
            ));
        }
        if let Some(burst) = &self.burst {
            if burst.max_tokens == 0 {
                return Err(GatekeeperError::invalid_policy(
                    &self.name,
                    "burst max_tokens must be greater than zero",
                ));
            }
            if burst.refill_window_secs == 0 {
                return Err(GatekeeperError::invalid_policy(
                    &self.name,
                    "burst refill_window_secs must be greater than zero",
                ));
            }
        }
        if let Some((method, _)) = self.method_limits.iter().find(|(_, limit)| **limit == 0) {
            return Err(GatekeeperError::invalid_policy(
                &self.name,
                format!("override limit for {} must be greater than zero", method),
            ));
        }
        if let Some(value) = self.target.value() {
            if value.is_empty() {
                return Err(GatekeeperError::invalid_policy(
                    &self.name,
                    "target value must not be empty",
                ));
            }
        }
        Ok(())
    }
}
