//! Configuration validation.
//!
//! Every problem is collected before failing, so a user fixing a config
//! file sees all of them in one pass.

use tracing::{debug, warn};

use crate::error::{ConfigError, Result};
use crate::version;

use super::spec::{ExecutionConfig, NodeConfig, NodePlanConfig, StateConfig, Transport};

/// Validator for `nodeplan.yaml`.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a configuration.
    ///
    /// # Errors
    ///
    /// Returns the first validation error, with its field.
    pub fn validate(&self, config: &NodePlanConfig) -> Result<ValidationResult> {
        let result = self.check(config);

        for warning in &result.warnings {
            warn!("{warning}");
        }

        if let Some(first) = result.errors.first() {
            return Err(ConfigError::ValidationError {
                message: first.message.clone(),
                field: Some(first.field.clone()),
            }
            .into());
        }

        debug!("Configuration validation passed");
        Ok(result)
    }

    /// Collects every error and warning without failing.
    #[must_use]
    pub fn check(&self, config: &NodePlanConfig) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_node(&config.node, &mut result);
        Self::validate_execution(&config.execution, &mut result);
        Self::validate_state(&config.state, &mut result);

        result
    }

    fn validate_node(node: &NodeConfig, result: &mut ValidationResult) {
        if let Some(name) = &node.name
            && !is_valid_node_name(name)
        {
            result.error(
                "node.name",
                format!(
                    "Node name '{name}' is invalid. Use letters, digits, '.', '-' or '_', \
                     starting with a letter or digit."
                ),
            );
        }

        match node.transport {
            Transport::Ssh => {
                if node.host.as_deref().is_none_or(str::is_empty) {
                    result.error("node.host", "A host is required for the ssh transport");
                }
                if node.user.is_empty() {
                    result.error("node.user", "SSH user cannot be empty");
                }
                if node.port == 0 {
                    result.error("node.port", "SSH port must be between 1 and 65535");
                }
                if let Some(key) = &node.identity_file
                    && !key.exists()
                {
                    result.warn(format!(
                        "node.identity_file: {} does not exist",
                        key.display()
                    ));
                }
            }
            Transport::Local => {
                if node.host.is_some() {
                    result.warn("node.host is ignored with the local transport");
                }
                if node.identity_file.is_some() {
                    result.warn("node.identity_file is ignored with the local transport");
                }
            }
        }

        if let Some(v) = &node.version
            && let Err(e) = version::parse(v)
        {
            result.error("node.version", e.to_string());
        }
    }

    fn validate_execution(execution: &ExecutionConfig, result: &mut ValidationResult) {
        if execution.max_concurrency == 0 {
            result.error("execution.max_concurrency", "Maximum concurrency must be at least 1");
        }
        if execution.command_timeout_secs == Some(0) {
            result.error(
                "execution.command_timeout_secs",
                "Command timeout must be at least 1 second",
            );
        }
    }

    fn validate_state(state: &StateConfig, result: &mut ValidationResult) {
        if state.dir.as_os_str().is_empty() {
            result.error("state.dir", "State directory cannot be empty");
        }
    }
}

/// Node names end up in file names.
fn is_valid_node_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !first.is_ascii_alphanumeric() {
        return false;
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_'))
}

impl ValidationResult {
    fn error(&mut self, field: &str, message: impl Into<String>) {
        self.errors.push(ValidationError {
            field: field.to_string(),
            message: message.into(),
        });
    }

    fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}
