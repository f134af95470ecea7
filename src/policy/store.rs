//! Cached, versioned view of the active policies.

use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::model::{Policy, PolicyId, Target, TargetKind};
use super::pattern::{GlobPattern, OriginMatcher};
use super::source::PolicySource;
use crate::error::{GatekeeperError, Result};

/// Compiled form of a policy's target.
#[derive(Debug, Clone)]
pub enum TargetMatcher {
    Global,
    Caller(GlobPattern),
    Endpoint(GlobPattern),
    Origin(OriginMatcher),
}

/// Compiled patterns of a policy.
#[derive(Debug, Clone)]
pub struct CompiledPatterns {
    pub target: TargetMatcher,
    pub include: Vec<GlobPattern>,
    pub exclude: Vec<GlobPattern>,
}

impl CompiledPatterns {
    fn compile(policy: &Policy) -> Result<Self> {
        let target = match &policy.target {
            Target::Global => TargetMatcher::Global,
            Target::Caller(pattern) => TargetMatcher::Caller(GlobPattern::compile(pattern)?),
            Target::Endpoint(pattern) => TargetMatcher::Endpoint(GlobPattern::compile(pattern)?),
            Target::Origin(value) => TargetMatcher::Origin(OriginMatcher::compile(value)?),
        };
        let include = policy
            .include_endpoints
            .iter()
            .map(|p| GlobPattern::compile(p))
            .collect::<Result<Vec<_>>>()?;
        let exclude = policy
            .exclude_endpoints
            .iter()
            .map(|p| GlobPattern::compile(p))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            target,
            include,
            exclude,
        })
    }
}

/// A policy as held by the store.
///
/// A malformed pattern does not reject the policy at load time; it is kept
/// with the compile error so the resolver can skip it and say why.
#[derive(Debug)]
pub struct StoredPolicy {
    pub policy: Policy,
    /// Monotonic version, bumped every time the policy is (re)loaded
    pub version: u64,
    pub patterns: std::result::Result<CompiledPatterns, String>,
}

impl StoredPolicy {
    pub fn id(&self) -> PolicyId {
        self.policy.id
    }
}

/// Holds the active policies in creation order.
///
/// Reads hand out a shared snapshot, so the request path never touches the
/// policy source. The source is consulted only on [`reload`](Self::reload)
/// and [`invalidate`](Self::invalidate).
pub struct PolicyStore {
    source: Option<Arc<dyn PolicySource>>,
    snapshot: RwLock<Arc<Vec<Arc<StoredPolicy>>>>,
    /// Last version handed out per policy; survives removal so versions never repeat
    versions: RwLock<HashMap<PolicyId, u64>>,
}

impl PolicyStore {
    /// Create an empty store with no backing source.
    pub fn new() -> Self {
        Self {
            source: None,
            snapshot: RwLock::new(Arc::new(Vec::new())),
            versions: RwLock::new(HashMap::new()),
        }
    }

    /// Create a store backed by `source` and load it.
    pub fn with_source(source: Arc<dyn PolicySource>) -> Result<Self> {
        let store = Self {
            source: Some(source),
            ..Self::new()
        };
        store.reload()?;
        Ok(store)
    }

    /// Current snapshot, in creation order.
    pub fn snapshot(&self) -> Arc<Vec<Arc<StoredPolicy>>> {
        self.snapshot.read().clone()
    }

    pub fn get(&self, id: PolicyId) -> Option<Arc<StoredPolicy>> {
        self.snapshot().iter().find(|p| p.id() == id).cloned()
    }

    pub fn get_by_name(&self, name: &str) -> Option<Arc<StoredPolicy>> {
        self.snapshot().iter().find(|p| p.policy.name == name).cloned()
    }

    /// Active policies of a scope type, optionally restricted to a target value.
    pub fn query(&self, kind: TargetKind, value: Option<&str>) -> Vec<Arc<StoredPolicy>> {
        self.snapshot()
            .iter()
            .filter(|p| p.policy.active && p.policy.target.kind() == kind)
            .filter(|p| value.map_or(true, |v| p.policy.target.value() == Some(v)))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.snapshot.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Version of a policy, if it has ever been loaded.
    pub fn version(&self, id: PolicyId) -> Option<u64> {
        self.versions.read().get(&id).copied()
    }

    /// Insert or replace a policy. Invalid policies are rejected.
    pub fn upsert(&self, policy: Policy) -> Result<u64> {
        policy.validate()?;

        let mut snapshot = self.snapshot.write();
        if snapshot
            .iter()
            .any(|p| p.policy.name == policy.name && p.id() != policy.id)
        {
            return Err(GatekeeperError::invalid_policy(
                &policy.name,
                "name is already used by another policy",
            ));
        }

        let stored = Arc::new(self.compile(policy));
        let version = stored.version;
        let mut next: Vec<Arc<StoredPolicy>> = snapshot.as_ref().clone();
        match next.iter_mut().find(|p| p.id() == stored.id()) {
            Some(existing) => *existing = stored,
            None => next.push(stored),
        }
        *snapshot = Arc::new(next);
        Ok(version)
    }

    /// Remove a policy from the store.
    pub fn remove(&self, id: PolicyId) -> bool {
        let mut snapshot = self.snapshot.write();
        if !snapshot.iter().any(|p| p.id() == id) {
            return false;
        }
        let next: Vec<Arc<StoredPolicy>> = snapshot.iter().filter(|p| p.id() != id).cloned().collect();
        *snapshot = Arc::new(next);
        true
    }

    /// Re-read a single policy from the source after an external change.
    ///
    /// A policy that disappeared from the source, or that no longer passes
    /// validation, is dropped from the store.
    pub fn invalidate(&self, id: PolicyId) -> Result<()> {
        let Some(source) = &self.source else {
            debug!(policy_id = %id, "Invalidation ignored, store has no source");
            return Ok(());
        };

        match source.load(id)? {
            Some(policy) => {
                if let Err(e) = self.upsert(policy) {
                    warn!(policy_id = %id, error = %e, "Invalidated policy rejected, removing it");
                    self.remove(id);
                }
            }
            None => {
                self.remove(id);
            }
        }

        debug!(policy_id = %id, version = ?self.version(id), "Policy invalidated");
        Ok(())
    }

    /// Replace the whole store with the source's current contents.
    ///
    /// Invalid policies and repeated ids or names are skipped with a warning;
    /// the first occurrence wins.
    pub fn reload(&self) -> Result<()> {
        let Some(source) = &self.source else {
            return Ok(());
        };
        let policies = source.load_all()?;

        let mut ids = HashSet::new();
        let mut names = HashSet::new();
        let mut next = Vec::with_capacity(policies.len());
        for policy in policies {
            if let Err(e) = policy.validate() {
                warn!(policy = %policy.name, error = %e, "Skipping invalid policy");
                continue;
            }
            if ids.contains(&policy.id) {
                warn!(policy = %policy.name, policy_id = %policy.id, "Skipping policy with duplicate id");
                continue;
            }
            if !names.insert(policy.name.clone()) {
                warn!(policy = %policy.name, "Skipping policy with duplicate name");
                continue;
            }
            ids.insert(policy.id);

            // Unchanged policies keep their version and compiled patterns
            let current = self.get(policy.id).filter(|p| p.policy == policy);
            next.push(match current {
                Some(existing) => existing,
                None => Arc::new(self.compile(policy)),
            });
        }

        let count = next.len();
        *self.snapshot.write() = Arc::new(next);
        info!(policies = count, "Policy store reloaded");
        Ok(())
    }

    fn compile(&self, policy: Policy) -> StoredPolicy {
        let version = {
            let mut versions = self.versions.write();
            let v = versions.entry(policy.id).or_insert(0);
            *v += 1;
            *v
        };
        let patterns = CompiledPatterns::compile(&policy).map_err(|e| e.to_string());
        if let Err(ref reason) = patterns {
            warn!(policy = %policy.name, error = %reason, "Policy has a malformed pattern");
        }

        StoredPolicy {
            policy,
            version,
            patterns,
        }
    }
}

impl Default for PolicyStore {
    fn default() -> Self {
        Self::new()
    }
}
