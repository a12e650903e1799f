//! Configuration types mapping to `nodeplan.yaml`.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::plan::DEFAULT_MAX_CONCURRENCY;
use crate::recipe::NodeRole;
use crate::resource::PkgType;

/// The root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodePlanConfig {
    /// Target node.
    pub node: NodeConfig,
    /// Executor settings.
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// Where node records are kept between runs.
    #[serde(default)]
    pub state: StateConfig,
}

/// Target node and how to reach it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeConfig {
    /// Name used for the stored node record. Defaults to the host.
    #[serde(default)]
    pub name: Option<String>,
    /// Hostname or address (required for SSH).
    #[serde(default)]
    pub host: Option<String>,
    /// SSH user.
    #[serde(default = "default_user")]
    pub user: String,
    /// SSH port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// SSH private key.
    #[serde(default)]
    pub identity_file: Option<PathBuf>,
    /// How commands reach the node.
    #[serde(default)]
    pub transport: Transport,
    /// Package-manager family.
    #[serde(default)]
    pub pkg_type: Option<PkgType>,
    /// Role in the cluster.
    #[serde(default)]
    pub role: Option<NodeRole>,
    /// Default Kubernetes version for upgrades.
    #[serde(default)]
    pub version: Option<String>,
}

/// Command transport.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// A shell on this host.
    Local,
    /// The system `ssh` client.
    #[default]
    Ssh,
}

/// Executor settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionConfig {
    /// Undo applied resources after a failure.
    #[serde(default)]
    pub rollback: bool,
    /// Resources applied at once across independent branches.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Default timeout for each command.
    #[serde(default)]
    pub command_timeout_secs: Option<u64>,
}

/// Node record storage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateConfig {
    /// Directory holding one JSON record per node.
    #[serde(default = "default_state_dir")]
    pub dir: PathBuf,
}

fn default_user() -> String {
    String::from("root")
}

const fn default_port() -> u16 {
    22
}

const fn default_max_concurrency() -> usize {
    DEFAULT_MAX_CONCURRENCY
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(crate::state::DEFAULT_STATE_DIR)
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: None,
            host: None,
            user: default_user(),
            port: default_port(),
            identity_file: None,
            transport: Transport::default(),
            pkg_type: None,
            role: None,
            version: None,
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            rollback: false,
            max_concurrency: default_max_concurrency(),
            command_timeout_secs: None,
        }
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            dir: default_state_dir(),
        }
    }
}

impl NodeConfig {
    /// Key of the node record: the name, else the host, else `localhost`.
    #[must_use]
    pub fn record_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.host.as_deref())
            .unwrap_or("localhost")
    }
}

impl ExecutionConfig {
    /// The default command timeout, if set.
    #[must_use]
    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_secs.map(Duration::from_secs)
    }
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Ssh => write!(f, "ssh"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_name_fallbacks() {
        let mut node = NodeConfig::default();
        assert_eq!(node.record_name(), "localhost");

        node.host = Some(String::from("10.0.0.5"));
        assert_eq!(node.record_name(), "10.0.0.5");

        node.name = Some(String::from("cp-1"));
        assert_eq!(node.record_name(), "cp-1");
    }

    #[test]
    fn test_command_timeout() {
        let execution = ExecutionConfig {
            command_timeout_secs: Some(90),
            ..ExecutionConfig::default()
        };
        assert_eq!(execution.command_timeout(), Some(Duration::from_secs(90)));
        assert_eq!(ExecutionConfig::default().command_timeout(), None);
    }
}
