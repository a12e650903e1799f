//! Fingerprints for change detection.
//!
//! A node record stores the fingerprint of the plan that produced it, so a
//! later run can tell whether the plan (or the node settings) changed.

use sha2::{Digest, Sha256};

use crate::plan::{Plan, State};

use super::spec::NodePlanConfig;

/// Hasher for configuration, states and plans.
#[derive(Debug, Default)]
pub struct ConfigHasher;

impl ConfigHasher {
    /// Creates a new hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Hash of the settings that decide what a plan does to a node.
    ///
    /// Executor and state settings are left out: they change how a plan
    /// runs, not what it does.
    #[must_use]
    pub fn hash_config(&self, config: &NodePlanConfig) -> String {
        let node = &config.node;
        let mut hasher = Sha256::new();

        hasher.update(node.record_name().as_bytes());
        hasher.update([0u8]);
        hasher.update(node.host.as_deref().unwrap_or_default().as_bytes());
        hasher.update([0u8]);
        hasher.update(node.user.as_bytes());
        hasher.update(node.port.to_be_bytes());
        hasher.update(node.transport.to_string().as_bytes());
        hasher.update([0u8]);
        if let Some(pkg_type) = node.pkg_type {
            hasher.update(pkg_type.to_string().as_bytes());
        }
        hasher.update([0u8]);
        if let Some(role) = node.role {
            hasher.update(role.to_string().as_bytes());
        }
        hasher.update([0u8]);
        if let Some(version) = &node.version {
            hasher.update(version.as_bytes());
        }

        hex::encode(hasher.finalize())
    }

    /// Hash of a state snapshot.
    #[must_use]
    pub fn hash_state(&self, state: &State) -> String {
        state.fingerprint()
    }

    /// Hash of a plan: names, kinds, edges and declared states, in order.
    #[must_use]
    pub fn hash_plan(&self, plan: &Plan) -> String {
        plan.fingerprint()
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }

    /// Compares two hashes.
    #[must_use]
    pub fn hashes_match(hash1: &str, hash2: &str) -> bool {
        hash1.len() == hash2.len() && hash1.eq_ignore_ascii_case(hash2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipe::{NodeRole, build_upgrade_plan};
    use crate::resource::PkgType;

    fn config(host: &str) -> NodePlanConfig {
        let mut config = NodePlanConfig::default();
        config.node.host = Some(host.to_string());
        config
    }

    #[test]
    fn test_config_hash_ignores_execution_settings() {
        let hasher = ConfigHasher::new();
        let base = config("10.0.0.5");
        let mut tuned = base.clone();
        tuned.execution.max_concurrency = 1;
        tuned.execution.rollback = true;

        assert_eq!(hasher.hash_config(&base), hasher.hash_config(&tuned));
        assert_ne!(hasher.hash_config(&base), hasher.hash_config(&config("10.0.0.6")));
    }

    #[test]
    fn test_plan_hash_tracks_version() {
        let hasher = ConfigHasher::new();
        let build = |v: &str| {
            build_upgrade_plan(PkgType::Rpm, v, NodeRole::Worker).expect("plan builds")
        };

        assert_eq!(hasher.hash_plan(&build("v1.16.2")), hasher.hash_plan(&build("v1.16.2")));
        assert_ne!(hasher.hash_plan(&build("v1.16.2")), hasher.hash_plan(&build("v1.16.3")));
    }

    #[test]
    fn test_state_hash() {
        let hasher = ConfigHasher::new();
        let a = State::new().with("version", "1.15.3");
        assert_eq!(hasher.hash_state(&a), hasher.hash_state(&a.clone()));
        assert_ne!(hasher.hash_state(&a), hasher.hash_state(&State::EMPTY));
    }

    #[test]
    fn test_short_hash() {
        let hasher = ConfigHasher::new();
        let short = hasher.short_hash("abcdef1234567890abcdef1234567890");
        assert_eq!(short, "abcdef12");
    }

    #[test]
    fn test_hashes_match() {
        assert!(ConfigHasher::hashes_match("abc123", "ABC123"));
        assert!(!ConfigHasher::hashes_match("abc123", "abc124"));
        assert!(!ConfigHasher::hashes_match("abc123", "abc12"));
    }
}
