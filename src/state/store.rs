//! State store trait definition.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::lock::LockInfo;
use super::record::NodeRecord;
use crate::error::Result;

/// Storage backend for node records, keyed by node name.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Loads the record for a node.
    ///
    /// Returns `None` if the node has never been recorded.
    async fn load(&self, node: &str) -> Result<Option<NodeRecord>>;

    /// Saves a node record, replacing any previous one.
    async fn save(&self, record: &NodeRecord) -> Result<()>;

    /// Deletes the record and lock of a node.
    async fn delete(&self, node: &str) -> Result<()>;

    /// Checks if a record exists for the node.
    async fn exists(&self, node: &str) -> Result<bool>;

    /// Acquires the run lock of a node.
    ///
    /// An empty `holder` is replaced by a generated process identifier.
    async fn acquire_lock(&self, node: &str, holder: &str) -> Result<LockInfo>;

    /// Pushes the expiry of a held lock forward.
    ///
    /// Fails if `lock_id` no longer owns the lock.
    async fn refresh_lock(&self, node: &str, lock_id: &str) -> Result<LockInfo>;

    /// Releases the run lock of a node if `lock_id` still owns it.
    async fn release_lock(&self, node: &str, lock_id: &str) -> Result<()>;

    /// Gets the current lock of a node, expired or not.
    async fn lock_info(&self, node: &str) -> Result<Option<LockInfo>>;

    /// Checks if the node holds a live lock.
    async fn is_locked(&self, node: &str) -> Result<bool> {
        Ok(self
            .lock_info(node)
            .await?
            .is_some_and(|lock| !lock.is_expired()))
    }

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}

/// Keeps a node lock from expiring while a run holds it.
#[derive(Debug)]
pub struct LockKeepalive {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

impl LockKeepalive {
    /// Starts refreshing `lock` in `store` every `every`.
    #[must_use]
    pub fn start<S>(store: Arc<S>, lock: &LockInfo, every: Duration) -> Self
    where
        S: StateStore + ?Sized + 'static,
    {
        let stop = CancellationToken::new();
        let token = stop.clone();
        let node = lock.node.clone();
        let lock_id = lock.lock_id.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // The first tick fires immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => match store.refresh_lock(&node, &lock_id).await {
                        Ok(lock) => {
                            debug!(%node, expires_at = %lock.expires_at, "Refreshed node lock");
                        }
                        Err(e) => warn!(%node, error = %e, "Failed to refresh node lock"),
                    },
                }
            }
        });

        Self { stop, handle }
    }

    /// Stops refreshing and waits for the background task to finish.
    pub async fn stop(self) {
        self.stop.cancel();
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Lock refresh task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::LocalStateStore;
    use chrono::Utc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_keepalive_extends_held_lock() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let store = Arc::new(LocalStateStore::with_base_dir(temp.path()));
        let mut lock = store.acquire_lock("node-1", "holder-1").await.expect("acquire");

        // Pretend the run has already used up most of the expiry window.
        lock.expires_at = Utc::now() + chrono::Duration::seconds(1);
        std::fs::write(
            temp.path().join("node-1.lock"),
            serde_json::to_string(&lock).expect("serialize"),
        )
        .expect("write");

        let keepalive = LockKeepalive::start(Arc::clone(&store), &lock, Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(60)).await;
        keepalive.stop().await;

        let current = store
            .lock_info("node-1")
            .await
            .expect("read lock")
            .expect("lock still held");
        assert_eq!(current.lock_id, lock.lock_id);
        assert!(current.remaining_secs() > 60);
    }
}
