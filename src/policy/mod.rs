//! Admission policies: definitions, storage and per-request resolution.

mod model;
mod pattern;
mod reloader;
mod resolver;
mod source;
mod store;

pub use model::{BurstConfig, Policy, PolicyId, Target, TargetKind};
pub use pattern::{GlobPattern, OriginMatcher};
pub use reloader::PolicyReloader;
pub use resolver::{PolicyResolver, ResolvedPolicy};
pub use source::{PolicyFile, PolicySource, StaticPolicySource, YamlPolicySource};
pub use store::{CompiledPatterns, PolicyStore, StoredPolicy, TargetMatcher};
