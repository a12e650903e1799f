//! Cluster reconciliation boundary.
//!
//! The controller side of node planning: a cluster object with marker
//! annotations, a store with optimistic concurrency, a bounded
//! retry-on-conflict combinator and the reconciler that ties them together.

mod object;
mod reconciler;
mod retry;
mod store;

pub use object::{ClusterObject, CREATING_ANNOTATION, LOCAL_CONTROLLER_ANNOTATION};
pub use reconciler::{ClusterInitializer, ClusterReconciler, ReconcileOutcome};
pub use retry::{Backoff, retry_on_conflict};
pub use store::{ClusterStore, MemoryClusterStore};

#[cfg(test)]
pub use store::MockClusterStore;
