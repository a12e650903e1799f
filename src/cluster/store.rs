//! Cluster object storage with optimistic concurrency.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::ReconcileError;

use super::object::ClusterObject;

/// Storage for cluster objects.
///
/// `update` is a compare-on-write: it fails with
/// [`ReconcileError::Conflict`] when the stored `resource_version` differs
/// from the one on the object being written.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// Reads a cluster object.
    async fn get(&self, name: &str) -> Result<Option<ClusterObject>, ReconcileError>;

    /// Writes a cluster object and returns it with its new version.
    async fn update(&self, object: &ClusterObject) -> Result<ClusterObject, ReconcileError>;
}

/// In-memory cluster store.
#[derive(Debug, Default)]
pub struct MemoryClusterStore {
    objects: RwLock<HashMap<String, ClusterObject>>,
}

impl MemoryClusterStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces an object, keeping its version.
    pub async fn insert(&self, object: ClusterObject) {
        self.objects.write().await.insert(object.name.clone(), object);
    }
}

#[async_trait]
impl ClusterStore for MemoryClusterStore {
    async fn get(&self, name: &str) -> Result<Option<ClusterObject>, ReconcileError> {
        Ok(self.objects.read().await.get(name).cloned())
    }

    async fn update(&self, object: &ClusterObject) -> Result<ClusterObject, ReconcileError> {
        let mut objects = self.objects.write().await;
        let Some(stored) = objects.get_mut(&object.name) else {
            return Err(ReconcileError::NotFound {
                cluster: object.name.clone(),
            });
        };
        if stored.resource_version != object.resource_version {
            return Err(ReconcileError::Conflict {
                cluster: object.name.clone(),
            });
        }

        let mut updated = object.clone();
        updated.resource_version += 1;
        *stored = updated.clone();
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_write_conflicts() {
        tokio_test::block_on(async {
            let store = MemoryClusterStore::new();
            store.insert(ClusterObject::new("c1")).await;

            let first = store.get("c1").await.expect("read").expect("present");
            let stale = first.clone();

            let written = store.update(&first).await.expect("fresh write");
            assert_eq!(written.resource_version, 1);

            let err = store.update(&stale).await.expect_err("stale write");
            assert_eq!(
                err,
                ReconcileError::Conflict {
                    cluster: String::from("c1")
                }
            );
        });
    }

    #[test]
    fn test_update_missing_object() {
        tokio_test::block_on(async {
            let store = MemoryClusterStore::new();
            let err = store
                .update(&ClusterObject::new("ghost"))
                .await
                .expect_err("missing object");
            assert!(matches!(err, ReconcileError::NotFound { .. }));
            assert!(store.get("ghost").await.expect("read").is_none());
        });
    }
}
