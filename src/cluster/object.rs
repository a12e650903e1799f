//! Cluster object model.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Marks a cluster managed by a controller running inside it.
pub const LOCAL_CONTROLLER_ANNOTATION: &str = "wks.weave.works/local-controller";

/// Marks a cluster whose initialization has started.
pub const CREATING_ANNOTATION: &str = "wks.weave.works/is-creating";

/// A cluster as seen by the reconciler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterObject {
    /// Cluster name.
    pub name: String,
    /// Version checked on every write.
    pub resource_version: u64,
    /// Annotations.
    pub annotations: BTreeMap<String, String>,
    /// Whether reconciliation is paused.
    pub paused: bool,
    /// Whether the cluster has been reconciled.
    pub ready: bool,
}

impl ClusterObject {
    /// Creates an unannotated cluster object.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Adds an annotation.
    #[must_use]
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// Sets the paused flag.
    #[must_use]
    pub const fn with_paused(mut self, paused: bool) -> Self {
        self.paused = paused;
        self
    }

    /// Returns true if `key` is set.
    #[must_use]
    pub fn has_annotation(&self, key: &str) -> bool {
        self.annotations.contains_key(key)
    }

    /// Returns true if neither marker annotation is set, meaning nobody has
    /// started initializing this cluster yet.
    #[must_use]
    pub fn needs_initialization(&self) -> bool {
        !self.has_annotation(LOCAL_CONTROLLER_ANNOTATION)
            && !self.has_annotation(CREATING_ANNOTATION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_needs_initialization() {
        assert!(ClusterObject::new("c1").needs_initialization());
        assert!(
            !ClusterObject::new("c1")
                .with_annotation(CREATING_ANNOTATION, "true")
                .needs_initialization()
        );
        assert!(
            !ClusterObject::new("c1")
                .with_annotation(LOCAL_CONTROLLER_ANNOTATION, "true")
                .needs_initialization()
        );
    }
}
