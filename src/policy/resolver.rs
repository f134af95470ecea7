//! Policy resolution for a single request.
//!
//! Resolution collects the candidates whose target matches the request,
//! applies include/exclude endpoint filters, substitutes per-method limits and
//! orders the result by priority. The engine evaluates policies in exactly the
//! order returned here.

use std::sync::Arc;
use tracing::{trace, warn};

use super::model::Policy;
use super::store::{PolicyStore, StoredPolicy, TargetMatcher};
use crate::ratelimit::RequestDescriptor;

/// A policy selected for a request, with the limit that applies to it.
#[derive(Debug, Clone)]
pub struct ResolvedPolicy {
    pub stored: Arc<StoredPolicy>,
    /// Base limit, or the per-method override for the request's method
    pub effective_limit: u64,
}

impl ResolvedPolicy {
    pub fn policy(&self) -> &Policy {
        &self.stored.policy
    }
}

/// Selects and orders the policies that apply to a request.
#[derive(Clone)]
pub struct PolicyResolver {
    store: Arc<PolicyStore>,
}

impl PolicyResolver {
    pub fn new(store: Arc<PolicyStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<PolicyStore> {
        &self.store
    }

    /// Applicable policies, highest priority first, ties in creation order.
    pub fn resolve(&self, request: &RequestDescriptor) -> Vec<ResolvedPolicy> {
        let snapshot = self.store.snapshot();
        let mut resolved: Vec<ResolvedPolicy> = snapshot
            .iter()
            .filter(|stored| stored.policy.active)
            .filter(|stored| Self::applies(stored, request))
            .map(|stored| ResolvedPolicy {
                stored: stored.clone(),
                effective_limit: stored.policy.limit_for(&request.method),
            })
            .collect();

        // Stable sort keeps creation order among equal priorities
        resolved.sort_by(|a, b| b.policy().priority.cmp(&a.policy().priority));

        trace!(
            identifier = %request.identifier,
            path = %request.path,
            policies = ?resolved.iter().map(|r| r.policy().name.as_str()).collect::<Vec<_>>(),
            "Resolved policies"
        );
        resolved
    }

    fn applies(stored: &StoredPolicy, request: &RequestDescriptor) -> bool {
        let patterns = match &stored.patterns {
            Ok(patterns) => patterns,
            Err(reason) => {
                warn!(
                    policy = %stored.policy.name,
                    error = %reason,
                    "Skipping policy with malformed pattern"
                );
                return false;
            }
        };

        let target_matches = match &patterns.target {
            TargetMatcher::Global => true,
            TargetMatcher::Caller(pattern) => pattern.matches(&request.identifier),
            TargetMatcher::Endpoint(pattern) => pattern.matches(&request.path),
            TargetMatcher::Origin(matcher) => request.origin().is_some_and(|o| matcher.matches(o)),
        };
        if !target_matches {
            return false;
        }

        if patterns.exclude.iter().any(|p| p.matches(&request.path)) {
            return false;
        }
        patterns.include.is_empty() || patterns.include.iter().any(|p| p.matches(&request.path))
    }
}
