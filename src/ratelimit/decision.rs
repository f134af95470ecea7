//! Admission verdicts and their HTTP rendering.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::policy::PolicyId;

/// Status code returned to throttled callers.
pub const STATUS_TOO_MANY_REQUESTS: u16 = 429;

/// Why a request was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DenyReason {
    Burst,
    Window,
}

/// Burst allowance of the reporting policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurstInfo {
    pub max_tokens: u32,
    /// Whole tokens left
    pub remaining: u32,
}

/// The engine's answer for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub allowed: bool,
    /// Name of the policy the limit fields describe
    pub policy: Option<String>,
    pub policy_id: Option<PolicyId>,
    pub limit: Option<u64>,
    pub remaining: Option<u64>,
    pub reset_at: Option<DateTime<Utc>>,
    pub retry_after_secs: Option<u64>,
    pub reason: Option<DenyReason>,
    pub burst: Option<BurstInfo>,
    /// At least one policy was skipped because the counter store failed
    #[serde(default)]
    pub degraded: bool,
}

impl Decision {
    /// Allowed with no applicable policy.
    pub fn unrestricted() -> Self {
        Self {
            allowed: true,
            policy: None,
            policy_id: None,
            limit: None,
            remaining: None,
            reset_at: None,
            retry_after_secs: None,
            reason: None,
            burst: None,
            degraded: false,
        }
    }

    pub fn status_code(&self) -> u16 {
        if self.allowed {
            200
        } else {
            STATUS_TOO_MANY_REQUESTS
        }
    }

    /// Rate limit response headers.
    ///
    /// `X-RateLimit-Reset` is the window end in epoch seconds; `Retry-After`
    /// is only present on denials.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = Vec::with_capacity(4);
        if !self.allowed {
            if let Some(retry_after) = self.retry_after_secs {
                headers.push(("Retry-After", retry_after.to_string()));
            }
        }
        if let Some(limit) = self.limit {
            headers.push(("X-RateLimit-Limit", limit.to_string()));
        }
        if let Some(remaining) = self.remaining {
            headers.push(("X-RateLimit-Remaining", remaining.to_string()));
        }
        if let Some(reset_at) = self.reset_at {
            headers.push(("X-RateLimit-Reset", reset_at.timestamp().to_string()));
        }
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_unrestricted_has_no_headers() {
        let decision = Decision::unrestricted();
        assert_eq!(decision.status_code(), 200);
        assert!(decision.headers().is_empty());
    }

    #[test]
    fn test_denied_headers() {
        let reset = Utc.with_ymd_and_hms(2024, 5, 1, 12, 1, 0).unwrap();
        let decision = Decision {
            allowed: false,
            policy: Some("per-ip".to_string()),
            policy_id: Some(PolicyId(1)),
            limit: Some(5),
            remaining: Some(0),
            reset_at: Some(reset),
            retry_after_secs: Some(42),
            reason: Some(DenyReason::Window),
            burst: None,
            degraded: false,
        };

        assert_eq!(decision.status_code(), 429);
        assert_eq!(
            decision.headers(),
            vec![
                ("Retry-After", "42".to_string()),
                ("X-RateLimit-Limit", "5".to_string()),
                ("X-RateLimit-Remaining", "0".to_string()),
                ("X-RateLimit-Reset", reset.timestamp().to_string()),
            ]
        );
    }
}
