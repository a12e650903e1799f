//! Error types for the node plan engine.
//!
//! This module provides the error hierarchy for every stage of a plan's
//! life: running commands, building the plan, querying and applying
//! resources, configuration, caller-owned state and cluster reconciliation.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the node plan engine.
#[derive(Debug, Error)]
pub enum NodePlanError {
    /// Command execution errors.
    #[error("Run error: {0}")]
    Run(#[from] RunError),

    /// Plan construction errors.
    #[error("Build error: {0}")]
    Build(#[from] BuildError),

    /// Resource query errors.
    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    /// Resource apply errors.
    #[error("Apply error: {0}")]
    Apply(#[from] ApplyError),

    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Cluster reconciliation errors.
    #[error("Reconciliation error: {0}")]
    Reconcile(#[from] ReconcileError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors returned by a [`Runner`](crate::runner::Runner).
///
/// The split between a non-zero exit and everything else is load-bearing:
/// probes read exit code 1 as "condition false", not as a failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RunError {
    /// The command ran and exited with a non-zero status.
    #[error("command exited with status {code}")]
    NonZeroExit {
        /// Exit code reported by the shell.
        code: i32,
        /// Whatever the command printed on stdout before exiting.
        output: String,
    },

    /// The command could not be run at all.
    #[error("transport failure: {message}")]
    Transport {
        /// Description of the failure.
        message: String,
    },

    /// The caller cancelled the command while it was in flight.
    #[error("command cancelled")]
    Cancelled,
}

/// Errors raised while turning a builder into a [`Plan`](crate::plan::Plan).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BuildError {
    /// Two resources were registered under the same name.
    #[error("duplicate resource name: {name}")]
    DuplicateResource {
        /// The duplicated name.
        name: String,
    },

    /// A dependency names a resource that was never registered.
    #[error("resource '{resource}' depends on unknown resource '{dependency}'")]
    UnknownDependency {
        /// Resource declaring the dependency.
        resource: String,
        /// The unresolved dependency name.
        dependency: String,
    },

    /// The dependency graph contains a cycle.
    #[error("dependency cycle detected between: {}", resources.join(", "))]
    Cycle {
        /// Resources left unsorted, in insertion order.
        resources: Vec<String>,
    },
}

/// Errors raised while probing a node for its live state.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
    /// None of the candidate sources for a fact could be read.
    #[error("Could not get {fact}")]
    Unreadable {
        /// Name of the fact being gathered.
        fact: String,
    },

    /// The source was readable but held nothing.
    #[error("{fact} is blank")]
    Blank {
        /// Name of the fact being gathered.
        fact: String,
    },

    /// The probe command failed in a way that is not a domain answer.
    #[error(transparent)]
    Runner(#[from] RunError),
}

/// Errors raised while applying a resource.
#[derive(Debug, Error)]
pub enum ApplyError {
    /// The resource's side-effecting command failed.
    #[error("{resource}: {source}")]
    Failed {
        /// Name or description of the resource.
        resource: String,
        /// Underlying runner error.
        #[source]
        source: RunError,
    },

    /// A nested plan stopped on a failing child.
    #[error("sub-plan step '{step}' failed: {message}")]
    SubPlan {
        /// Name of the failing child resource.
        step: String,
        /// Rendered child error.
        message: String,
    },
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// A value could not be interpreted.
    #[error("Invalid value for {field}: {value}")]
    InvalidValue {
        /// Field holding the value.
        field: String,
        /// The rejected value.
        value: String,
    },
}

/// Errors from the caller-owned state store.
#[derive(Debug, Error)]
pub enum StateError {
    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// State could not be written.
    #[error("Failed to write state: {message}")]
    WriteFailed {
        /// Description of the failure.
        message: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// The node lock could not be taken or released.
    #[error("Failed to acquire node lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// Another operator holds a live lock on the node.
    #[error("Node is locked by {holder} since {since}")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },
}

/// Cluster reconciliation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReconcileError {
    /// The cluster object does not exist.
    #[error("Cluster not found: {cluster}")]
    NotFound {
        /// Name of the cluster.
        cluster: String,
    },

    /// The write lost an optimistic-concurrency race.
    #[error("Conflict writing cluster {cluster}: object has been modified")]
    Conflict {
        /// Name of the cluster.
        cluster: String,
    },

    /// Every retry of an annotation update hit a conflict.
    #[error("Failed to set annotation: {key} for cluster: {cluster} after {attempts} attempts")]
    ConflictRetriesExhausted {
        /// Name of the cluster.
        cluster: String,
        /// Annotation key being written.
        key: String,
        /// Number of attempts made.
        attempts: u32,
    },

    /// The store failed for a reason other than a conflict.
    #[error("Cluster store error for {cluster}: {message}")]
    Store {
        /// Name of the cluster.
        cluster: String,
        /// Description of the failure.
        message: String,
    },
}

/// Result type alias for node plan operations.
pub type Result<T> = std::result::Result<T, NodePlanError>;

impl NodePlanError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns the runner error at the root of this error, if any.
    #[must_use]
    pub const fn run_error(&self) -> Option<&RunError> {
        match self {
            Self::Run(e)
            | Self::Query(QueryError::Runner(e))
            | Self::Apply(ApplyError::Failed { source: e, .. }) => Some(e),
            _ => None,
        }
    }

    /// Returns true if this error comes from a cancelled command.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.run_error().is_some_and(RunError::is_cancelled)
    }
}

impl RunError {
    /// Creates a transport error with the given message.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Returns the exit code if the command ran and exited non-zero.
    #[must_use]
    pub const fn exit_code(&self) -> Option<i32> {
        match self {
            Self::NonZeroExit { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Returns true if the command ran and exited non-zero.
    #[must_use]
    pub const fn is_non_zero_exit(&self) -> bool {
        matches!(self, Self::NonZeroExit { .. })
    }

    /// Returns true if the command was cancelled.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }
}

impl StateError {
    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }

    /// Creates a corruption error with the given message.
    #[must_use]
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }

    /// Creates a write error with the given message.
    #[must_use]
    pub fn write_failed(message: impl Into<String>) -> Self {
        Self::WriteFailed {
            message: message.into(),
        }
    }

    /// Creates a lock error with the given message.
    #[must_use]
    pub fn lock_failed(message: impl Into<String>) -> Self {
        Self::LockFailed {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_only_for_non_zero_exit() {
        let err = RunError::NonZeroExit {
            code: 1,
            output: String::new(),
        };
        assert_eq!(err.exit_code(), Some(1));
        assert!(err.is_non_zero_exit());
        assert_eq!(RunError::Cancelled.exit_code(), None);
        assert_eq!(RunError::transport("ssh: connect refused").exit_code(), None);
    }

    #[test]
    fn test_cancellation_visible_through_wrappers() {
        let err = NodePlanError::Apply(ApplyError::Failed {
            resource: String::from("install"),
            source: RunError::Cancelled,
        });
        assert!(err.is_cancelled());

        let err = NodePlanError::Query(QueryError::Blank {
            fact: String::from("MachineID"),
        });
        assert!(!err.is_cancelled());
    }

    #[test]
    fn test_query_error_messages() {
        let unreadable = QueryError::Unreadable {
            fact: String::from("MachineID"),
        };
        let blank = QueryError::Blank {
            fact: String::from("MachineID"),
        };
        assert_eq!(unreadable.to_string(), "Could not get MachineID");
        assert_eq!(blank.to_string(), "MachineID is blank");
    }

    #[test]
    fn test_cycle_message_lists_members() {
        let err = BuildError::Cycle {
            resources: vec![String::from("a"), String::from("b")],
        };
        assert_eq!(err.to_string(), "dependency cycle detected between: a, b");
    }
}
