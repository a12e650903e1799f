//! Configuration module.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `nodeplan.yaml`
//! - `.env` loading and `NODEPLAN_*` environment overrides
//! - Validation of configuration values
//! - Fingerprints for change detection

mod hash;
mod parser;
mod spec;
mod validator;

pub use hash::ConfigHasher;
pub use parser::{
    ConfigParser, DEFAULT_CONFIG_FILES, ENV_HOST, ENV_PORT, ENV_STATE_DIR, ENV_USER,
    find_config_file,
};
pub use spec::{ExecutionConfig, NodeConfig, NodePlanConfig, StateConfig, Transport};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
