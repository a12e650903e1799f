//! State management module.
//!
//! This module persists, per node, the last observed state of every resource
//! so the next run can diff against it, along with a bounded run history and
//! a run lock.

mod local;
mod lock;
mod record;
mod store;

pub use local::{DEFAULT_STATE_DIR, LocalStateStore};
pub use lock::{LOCK_EXPIRY_SECS, LOCK_REFRESH_SECS, LockInfo, generate_holder_id};
pub use record::{NodeRecord, RECORD_VERSION, RunHistoryEntry, RunOperation};
pub use store::{LockKeepalive, StateStore};
