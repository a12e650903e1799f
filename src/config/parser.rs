//! Loading `nodeplan.yaml`, `.env` and environment overrides.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{ConfigError, Result};

use super::spec::NodePlanConfig;

/// Overrides `node.host`.
pub const ENV_HOST: &str = "NODEPLAN_HOST";
/// Overrides `node.user`.
pub const ENV_USER: &str = "NODEPLAN_USER";
/// Overrides `node.port`.
pub const ENV_PORT: &str = "NODEPLAN_PORT";
/// Overrides `state.dir`.
pub const ENV_STATE_DIR: &str = "NODEPLAN_STATE_DIR";

/// Configuration parser.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Directory the `.env` file is looked up in.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the directory holding the `.env` file.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<NodePlanConfig> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }
            .into());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ParseError {
            message: format!("Failed to read file: {e}"),
            location: Some(path.display().to_string()),
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<NodePlanConfig> {
        debug!("Parsing YAML configuration");

        let config: NodePlanConfig =
            serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location: source.map(|p| p.display().to_string()),
            })?;

        debug!(node = %config.node.record_name(), "Parsed configuration");
        Ok(config)
    }

    /// Loads the file, then applies `NODEPLAN_*` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or an override
    /// holds an invalid value.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<NodePlanConfig> {
        let mut config = self.load_file(path)?;
        Self::apply_overrides(&mut config, |key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Applies overrides read through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for a port that is not a number.
    pub fn apply_overrides<F>(config: &mut NodePlanConfig, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup(ENV_HOST) {
            debug!("Overriding node.host from environment");
            config.node.host = Some(host);
        }

        if let Some(user) = lookup(ENV_USER) {
            debug!("Overriding node.user from environment");
            config.node.user = user;
        }

        if let Some(port) = lookup(ENV_PORT) {
            debug!("Overriding node.port from environment");
            config.node.port = port.trim().parse().map_err(|_| ConfigError::InvalidValue {
                field: String::from(ENV_PORT),
                value: port.clone(),
            })?;
        }

        if let Some(dir) = lookup(ENV_STATE_DIR) {
            debug!("Overriding state.dir from environment");
            config.state.dir = PathBuf::from(dir);
        }

        Ok(())
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| ConfigError::ParseError {
                message: format!("Failed to load .env file: {e}"),
                location: Some(env_path.display().to_string()),
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }
}

/// Configuration file names searched for, in order.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["nodeplan.yaml", "nodeplan.yml", ".nodeplan.yaml"];

/// Finds the configuration file in `start_dir` or its parents.
///
/// # Errors
///
/// Returns an error if no configuration file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }
    .into())
}
