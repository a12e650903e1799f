//! Local file-based state storage backend.
//!
//! Each node gets `<dir>/<node>.json` for its record and `<dir>/<node>.lock`
//! while a run holds it.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{Result, StateError};

use super::lock::{LOCK_EXPIRY_SECS, LockInfo, generate_holder_id};
use super::record::NodeRecord;
use super::store::StateStore;

/// Default state directory name.
pub const DEFAULT_STATE_DIR: &str = ".nodeplan";

/// Local file-based state store.
#[derive(Debug, Clone)]
pub struct LocalStateStore {
    /// Directory holding record and lock files.
    base_dir: PathBuf,
}

impl LocalStateStore {
    /// Creates a store rooted at a custom directory.
    #[must_use]
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Directory holding record and lock files.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Path of the record file of a node.
    ///
    /// # Errors
    ///
    /// Returns an error if the node name cannot be used as a file name.
    pub fn record_path(&self, node: &str) -> Result<PathBuf> {
        Ok(self.base_dir.join(format!("{}.json", file_stem(node)?)))
    }

    fn lock_path(&self, node: &str) -> Result<PathBuf> {
        Ok(self.base_dir.join(format!("{}.lock", file_stem(node)?)))
    }

    async fn ensure_dir(&self) -> Result<()> {
        if !self.base_dir.exists() {
            debug!("Creating state directory: {}", self.base_dir.display());
            fs::create_dir_all(&self.base_dir).await.map_err(|e| {
                StateError::write_failed(format!("Failed to create state directory: {e}"))
            })?;
        }
        Ok(())
    }

    /// Writes `content` next to `path` and renames it into place.
    async fn write_atomic(&self, path: &Path, content: &str) -> Result<()> {
        self.ensure_dir().await?;

        let mut temp_path = path.as_os_str().to_owned();
        temp_path.push(".tmp");
        let temp_path = PathBuf::from(temp_path);
        let mut file = fs::File::create(&temp_path).await.map_err(|e| {
            StateError::write_failed(format!("Failed to create {}: {e}", temp_path.display()))
        })?;
        file.write_all(content.as_bytes()).await.map_err(|e| {
            StateError::write_failed(format!("Failed to write {}: {e}", temp_path.display()))
        })?;
        file.sync_all().await.map_err(|e| {
            StateError::write_failed(format!("Failed to sync {}: {e}", temp_path.display()))
        })?;

        fs::rename(&temp_path, path).await.map_err(|e| {
            StateError::write_failed(format!("Failed to rename {}: {e}", path.display()))
        })?;
        Ok(())
    }

    async fn remove_if_present(path: &Path) -> Result<()> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StateError::write_failed(format!(
                "Failed to delete {}: {e}",
                path.display()
            ))
            .into()),
        }
    }

    async fn read_lock_file(&self, node: &str) -> Result<Option<LockInfo>> {
        let path = self.lock_path(node)?;
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path)
            .await
            .map_err(|e| StateError::corrupted(format!("Failed to read lock file: {e}")))?;
        let lock = serde_json::from_str(&content)
            .map_err(|e| StateError::corrupted(format!("Failed to parse lock file: {e}")))?;
        Ok(Some(lock))
    }
}

/// Rejects names that would escape the state directory.
fn file_stem(node: &str) -> Result<&str> {
    if node.is_empty()
        || node.starts_with('.')
        || node.contains(['/', '\\'])
        || node.chars().any(char::is_control)
    {
        return Err(StateError::write_failed(format!(
            "Node name '{node}' cannot be used as a state file name"
        ))
        .into());
    }
    Ok(node)
}

#[async_trait]
impl StateStore for LocalStateStore {
    async fn load(&self, node: &str) -> Result<Option<NodeRecord>> {
        let path = self.record_path(node)?;
        if !path.exists() {
            debug!("No record for node {node} at {}", path.display());
            return Ok(None);
        }

        info!("Loading node record from: {}", path.display());

        let content = fs::read_to_string(&path)
            .await
            .map_err(|e| StateError::corrupted(format!("Failed to read record file: {e}")))?;
        let record: NodeRecord = serde_json::from_str(&content)
            .map_err(|e| StateError::corrupted(format!("Failed to parse record file: {e}")))?;

        if record.node != node {
            return Err(StateError::corrupted(format!(
                "Record at {} belongs to node '{}'",
                path.display(),
                record.node
            ))
            .into());
        }
        Ok(Some(record))
    }

    async fn save(&self, record: &NodeRecord) -> Result<()> {
        let path = self.record_path(&record.node)?;
        info!("Saving node record to: {}", path.display());

        let content = serde_json::to_string_pretty(record)
            .map_err(|e| StateError::serialization(format!("Failed to serialize record: {e}")))?;
        self.write_atomic(&path, &content).await?;

        debug!("Node record saved");
        Ok(())
    }

    async fn delete(&self, node: &str) -> Result<()> {
        let path = self.record_path(node)?;
        info!("Deleting node record: {}", path.display());
        Self::remove_if_present(&path).await?;
        Self::remove_if_present(&self.lock_path(node)?).await
    }

    async fn exists(&self, node: &str) -> Result<bool> {
        Ok(self.record_path(node)?.exists())
    }

    async fn acquire_lock(&self, node: &str, holder: &str) -> Result<LockInfo> {
        if let Some(existing) = self.read_lock_file(node).await? {
            if !existing.is_expired() {
                return Err(StateError::LockedByOther {
                    holder: existing.holder,
                    since: existing.acquired_at.to_rfc3339(),
                }
                .into());
            }
            debug!(holder = %existing.holder, "Expired lock found, taking over");
        }

        let holder_id = if holder.is_empty() {
            generate_holder_id()
        } else {
            holder.to_string()
        };

        let lock = LockInfo::new(node, &holder_id);
        let content = serde_json::to_string_pretty(&lock)
            .map_err(|e| StateError::serialization(format!("Failed to serialize lock: {e}")))?;
        self.write_atomic(&self.lock_path(node)?, &content)
            .await
            .map_err(|e| StateError::lock_failed(e.to_string()))?;

        info!(
            "Acquired lock on {node}: {} (expires in {LOCK_EXPIRY_SECS}s)",
            lock.lock_id
        );
        Ok(lock)
    }

    async fn refresh_lock(&self, node: &str, lock_id: &str) -> Result<LockInfo> {
        let Some(mut lock) = self.read_lock_file(node).await? else {
            let message = format!("Lock {lock_id} on {node} is gone");
            return Err(StateError::lock_failed(message).into());
        };
        if lock.lock_id != lock_id {
            return Err(StateError::LockedByOther {
                holder: lock.holder,
                since: lock.acquired_at.to_rfc3339(),
            }
            .into());
        }

        lock.refresh();
        let content = serde_json::to_string_pretty(&lock)
            .map_err(|e| StateError::serialization(format!("Failed to serialize lock: {e}")))?;
        self.write_atomic(&self.lock_path(node)?, &content)
            .await
            .map_err(|e| StateError::lock_failed(e.to_string()))?;

        debug!("Refreshed lock on {node}: {lock_id}");
        Ok(lock)
    }

    async fn release_lock(&self, node: &str, lock_id: &str) -> Result<()> {
        if let Some(existing) = self.read_lock_file(node).await? {
            if existing.lock_id == lock_id {
                Self::remove_if_present(&self.lock_path(node)?).await?;
                info!("Released lock on {node}: {lock_id}");
            } else {
                debug!(
                    "Lock ID mismatch on {node}: expected {lock_id}, found {}",
                    existing.lock_id
                );
            }
        }
        Ok(())
    }

    async fn lock_info(&self, node: &str) -> Result<Option<LockInfo>> {
        self.read_lock_file(node).await
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NodePlanError;
    use tempfile::TempDir;

    fn create_test_store() -> (LocalStateStore, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = LocalStateStore::with_base_dir(temp_dir.path().join("state"));
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let (store, _temp) = create_test_store();

        let mut record = NodeRecord::new("node-1");
        record.plan_fingerprint = String::from("abc123");
        store.save(&record).await.expect("Failed to save record");

        let loaded = store
            .load("node-1")
            .await
            .expect("Failed to load record")
            .expect("Record should exist");

        assert_eq!(loaded.node, "node-1");
        assert_eq!(loaded.plan_fingerprint, "abc123");
        assert!(store.base_dir().join("node-1.json").exists());
    }

    #[tokio::test]
    async fn test_load_nonexistent() {
        let (store, _temp) = create_test_store();

        let result = store.load("node-1").await.expect("Load should not fail");
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_records_are_per_node() {
        let (store, _temp) = create_test_store();

        store.save(&NodeRecord::new("node-1")).await.expect("save");
        assert!(store.exists("node-1").await.expect("exists check failed"));
        assert!(!store.exists("node-2").await.expect("exists check failed"));

        store.delete("node-1").await.expect("delete");
        assert!(!store.exists("node-1").await.expect("exists check failed"));
        store.delete("node-1").await.expect("second delete is a no-op");
    }

    #[tokio::test]
    async fn test_corrupted_record() {
        let (store, _temp) = create_test_store();
        std::fs::create_dir_all(store.base_dir()).expect("mkdir");
        std::fs::write(store.base_dir().join("node-1.json"), "{not json").expect("write");

        let err = store.load("node-1").await.expect_err("corrupted record");
        assert!(matches!(err, NodePlanError::State(StateError::Corrupted { .. })));
    }

    #[tokio::test]
    async fn test_rejects_path_like_names() {
        let (store, _temp) = create_test_store();

        assert!(store.load("../etc/passwd").await.is_err());
        assert!(store.save(&NodeRecord::new(".hidden")).await.is_err());
    }

    #[tokio::test]
    async fn test_lock_acquire_release() {
        let (store, _temp) = create_test_store();

        let lock = store
            .acquire_lock("node-1", "test-holder")
            .await
            .expect("Failed to acquire lock");

        assert!(store.is_locked("node-1").await.expect("is_locked failed"));
        assert!(!store.is_locked("node-2").await.expect("is_locked failed"));

        store
            .release_lock("node-1", &lock.lock_id)
            .await
            .expect("Failed to release lock");

        assert!(!store.is_locked("node-1").await.expect("is_locked failed"));
    }

    #[tokio::test]
    async fn test_lock_conflict() {
        let (store, _temp) = create_test_store();

        let _lock = store
            .acquire_lock("node-1", "holder-1")
            .await
            .expect("Failed to acquire first lock");

        let err = store
            .acquire_lock("node-1", "holder-2")
            .await
            .expect_err("second holder must wait");
        assert!(matches!(
            err,
            NodePlanError::State(StateError::LockedByOther { ref holder, .. })
                if holder == "holder-1"
        ));
    }

    #[tokio::test]
    async fn test_expired_lock_is_taken_over() {
        let (store, _temp) = create_test_store();

        let mut stale = LockInfo::new("node-1", "holder-1");
        stale.expires_at = chrono::Utc::now() - chrono::Duration::seconds(1);
        std::fs::create_dir_all(store.base_dir()).expect("mkdir");
        std::fs::write(
            store.base_dir().join("node-1.lock"),
            serde_json::to_string(&stale).expect("serialize"),
        )
        .expect("write");

        let lock = store.acquire_lock("node-1", "").await.expect("take over");
        assert_ne!(lock.holder, "holder-1");
        assert_ne!(lock.lock_id, stale.lock_id);
    }

    #[tokio::test]
    async fn test_refresh_requires_owning_lock() {
        let (store, _temp) = create_test_store();

        let err = store
            .refresh_lock("node-1", "missing")
            .await
            .expect_err("nothing to refresh");
        assert!(matches!(err, NodePlanError::State(StateError::LockFailed { .. })));

        let lock = store.acquire_lock("node-1", "holder-1").await.expect("acquire");
        let err = store
            .refresh_lock("node-1", "someone-else")
            .await
            .expect_err("foreign lock id");
        assert!(matches!(err, NodePlanError::State(StateError::LockedByOther { .. })));

        let refreshed = store.refresh_lock("node-1", &lock.lock_id).await.expect("refresh");
        assert_eq!(refreshed.lock_id, lock.lock_id);
        assert!(refreshed.expires_at >= lock.expires_at);
    }

    #[tokio::test]
    async fn test_release_with_foreign_id_keeps_lock() {
        let (store, _temp) = create_test_store();

        store.acquire_lock("node-1", "holder-1").await.expect("acquire");
        store
            .release_lock("node-1", "someone-else")
            .await
            .expect("release is a no-op");
        assert!(store.is_locked("node-1").await.expect("is_locked failed"));
    }
}
