//! Cluster reconciler.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, error, info};

use crate::error::ReconcileError;

use super::object::{ClusterObject, CREATING_ANNOTATION};
use super::retry::{Backoff, retry_on_conflict};
use super::store::ClusterStore;

/// One-time initialization of a newly seen cluster.
#[async_trait]
pub trait ClusterInitializer: Send + Sync {
    /// Called once, after the creating marker has been written.
    async fn initialize(&self, cluster: &ClusterObject) -> Result<(), ReconcileError>;
}

/// What a reconciliation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReconcileOutcome {
    /// The cluster does not exist.
    NotFound,
    /// The cluster is paused; nothing was done after initialization.
    Paused,
    /// The cluster was marked ready.
    Ready {
        /// Whether this pass ran the initializer.
        initialized: bool,
    },
}

/// Reconciles cluster objects.
pub struct ClusterReconciler<S: ClusterStore> {
    /// Cluster store.
    store: S,
    /// Initialization hook.
    initializer: Arc<dyn ClusterInitializer>,
    /// Retry policy for conflicting writes.
    backoff: Backoff,
}

impl<S: ClusterStore> ClusterReconciler<S> {
    /// Creates a reconciler over `store`.
    #[must_use]
    pub fn new(store: S, initializer: Arc<dyn ClusterInitializer>) -> Self {
        Self {
            store,
            initializer,
            backoff: Backoff::default(),
        }
    }

    /// Sets the retry policy.
    #[must_use]
    pub const fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// The underlying store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Reconciles the cluster called `name`.
    ///
    /// A missing cluster is not an error. The creating marker is written
    /// with optimistic concurrency before the initializer runs, so at most
    /// one pass initializes a cluster.
    ///
    /// # Errors
    ///
    /// Returns store failures and [`ReconcileError::ConflictRetriesExhausted`].
    pub async fn reconcile(&self, name: &str) -> Result<ReconcileOutcome, ReconcileError> {
        self.reconcile_inner(name).await.inspect_err(|e| {
            error!(cluster = %name, error = %e, "Reconciliation failed");
        })
    }

    async fn reconcile_inner(&self, name: &str) -> Result<ReconcileOutcome, ReconcileError> {
        let Some(cluster) = self.store.get(name).await? else {
            debug!(cluster = %name, "Cluster not found, nothing to do");
            return Ok(ReconcileOutcome::NotFound);
        };

        let mut initialized = false;
        if cluster.needs_initialization()
            && let Some(marked) = self.claim_initialization(name).await?
        {
            info!(cluster = %name, "Initializing cluster");
            self.initializer.initialize(&marked).await?;
            initialized = true;
        }

        let cluster = self.get_existing(name).await?;
        if cluster.paused {
            info!(cluster = %name, "Cluster is marked as paused, won't reconcile");
            return Ok(ReconcileOutcome::Paused);
        }

        self.modify(name, |c| c.ready = true).await?;
        info!(cluster = %name, initialized, "Cluster ready");
        Ok(ReconcileOutcome::Ready { initialized })
    }

    /// Sets one annotation with read-modify-write retries.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::ConflictRetriesExhausted`] naming the
    /// cluster and key when every attempt conflicted.
    pub async fn set_annotation(
        &self,
        name: &str,
        key: &str,
        value: &str,
    ) -> Result<ClusterObject, ReconcileError> {
        self.modify(name, |c| {
            c.annotations.insert(key.to_string(), value.to_string());
        })
        .await
        .map_err(|e| self.exhausted(e, key))
    }

    /// Writes the creating marker unless some pass already did.
    ///
    /// Every attempt re-checks the freshly read object, so a pass that lost
    /// the write race sees the winner's marker and returns `None`.
    async fn claim_initialization(
        &self,
        name: &str,
    ) -> Result<Option<ClusterObject>, ReconcileError> {
        retry_on_conflict(&self.backoff, || async {
            let mut current = self.get_existing(name).await?;
            if !current.needs_initialization() {
                debug!(cluster = %name, "Initialization already claimed");
                return Ok(None);
            }
            current
                .annotations
                .insert(CREATING_ANNOTATION.to_string(), String::from("true"));
            self.store.update(&current).await.map(Some)
        })
        .await
        .map_err(|e| self.exhausted(e, CREATING_ANNOTATION))
    }

    fn exhausted(&self, err: ReconcileError, key: &str) -> ReconcileError {
        match err {
            ReconcileError::Conflict { cluster } => ReconcileError::ConflictRetriesExhausted {
                cluster,
                key: key.to_string(),
                attempts: self.backoff.steps,
            },
            other => other,
        }
    }

    async fn get_existing(&self, name: &str) -> Result<ClusterObject, ReconcileError> {
        self.store
            .get(name)
            .await?
            .ok_or_else(|| ReconcileError::NotFound {
                cluster: name.to_string(),
            })
    }

    async fn modify<F>(&self, name: &str, update: F) -> Result<ClusterObject, ReconcileError>
    where
        F: Fn(&mut ClusterObject),
    {
        retry_on_conflict(&self.backoff, || async {
            let mut current = self.get_existing(name).await?;
            update(&mut current);
            self.store.update(&current).await
        })
        .await
    }
}
