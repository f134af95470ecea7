//! Where policies come from.
//!
//! Policies are managed outside the engine. A [`PolicySource`] is the read side
//! of that external system; the [`PolicyStore`](super::PolicyStore) caches what
//! it returns and only goes back to the source on reload or invalidation.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use super::model::{Policy, PolicyId};
use crate::error::{GatekeeperError, Result};

/// Read access to externally managed policies.
pub trait PolicySource: Send + Sync {
    /// Load every policy, in creation order.
    fn load_all(&self) -> Result<Vec<Policy>>;

    /// Load a single policy.
    fn load(&self, id: PolicyId) -> Result<Option<Policy>> {
        Ok(self.load_all()?.into_iter().find(|p| p.id == id))
    }
}

/// On-disk layout of a policy file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyFile {
    #[serde(default)]
    pub policies: Vec<Policy>,
}

impl PolicyFile {
    /// Parse a policy file from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| GatekeeperError::Config(format!("Failed to parse policy file: {}", e)))
    }
}

/// Policies read from a YAML file on every load.
#[derive(Debug, Clone)]
pub struct YamlPolicySource {
    path: PathBuf,
}

impl YamlPolicySource {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PolicySource for YamlPolicySource {
    fn load_all(&self) -> Result<Vec<Policy>> {
        info!(path = %self.path.display(), "Loading policy file");
        let contents = std::fs::read_to_string(&self.path)?;
        Ok(PolicyFile::from_yaml(&contents)?.policies)
    }
}

/// In-memory policy source, edited directly by an embedding application.
#[derive(Debug, Default)]
pub struct StaticPolicySource {
    policies: RwLock<Vec<Policy>>,
}

impl StaticPolicySource {
    pub fn new(policies: Vec<Policy>) -> Self {
        Self {
            policies: RwLock::new(policies),
        }
    }

    /// Insert or replace a policy, keeping the original position on replace.
    pub fn put(&self, policy: Policy) {
        let mut policies = self.policies.write();
        match policies.iter_mut().find(|p| p.id == policy.id) {
            Some(existing) => *existing = policy,
            None => policies.push(policy),
        }
    }

    pub fn remove(&self, id: PolicyId) {
        self.policies.write().retain(|p| p.id != id);
    }
}

impl PolicySource for StaticPolicySource {
    fn load_all(&self) -> Result<Vec<Policy>> {
        Ok(self.policies.read().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::Target;
    use crate::ratelimit::WindowKind;

    #[test]
    fn test_parse_policy_file() {
        let yaml = r#"
policies:
  - id: 1
    name: global
    target: { type: global }
    window: minute
    limit: 1000
  - id: 2
    name: per-ip
    target: { type: origin, value: 10.0.0.0/8 }
    window: hour
    limit: 50
    priority: 10
"#;
        let file = PolicyFile::from_yaml(yaml).unwrap();
        assert_eq!(file.policies.len(), 2);
        assert_eq!(file.policies[1].target, Target::Origin("10.0.0.0/8".to_string()));
        assert_eq!(file.policies[1].priority, 10);
    }

    #[test]
    fn test_parse_policy_file_error() {
        let err = PolicyFile::from_yaml("policies: [ { id: nope } ]").unwrap_err();
        assert!(matches!(err, GatekeeperError::Config(_)));
    }

    #[test]
    fn test_yaml_source_reads_file() {
        let path = std::env::temp_dir().join(format!("gatekeeper-policies-{}.yaml", uuid::Uuid::new_v4()));
        std::fs::write(
            &path,
            "policies:\n  - { id: 3, name: a, target: { type: global }, window: day, limit: 9 }\n",
        )
        .unwrap();

        let source = YamlPolicySource::new(&path);
        let policies = source.load_all().unwrap();
        assert_eq!(policies.len(), 1);
        assert_eq!(policies[0].window, WindowKind::Day);
        assert!(source.load(PolicyId(3)).unwrap().is_some());
        assert!(source.load(PolicyId(4)).unwrap().is_none());

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_static_source_put_replaces_in_place() {
        let source = StaticPolicySource::new(vec![
            Policy::new(1, "a", Target::Global, WindowKind::Minute, 1),
            Policy::new(2, "b", Target::Global, WindowKind::Minute, 2),
        ]);
        source.put(Policy::new(1, "a", Target::Global, WindowKind::Minute, 10));

        let all = source.load_all().unwrap();
        assert_eq!(all[0].limit, 10);
        assert_eq!(all[1].id, PolicyId(2));

        source.remove(PolicyId(1));
        assert_eq!(source.load_all().unwrap().len(), 1);
    }
}
