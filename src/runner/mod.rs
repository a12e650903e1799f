//! Command execution against a single target node.
//!
//! The [`Runner`] trait is the only boundary in the crate that reaches
//! outside the process. Everything above it is pure orchestration.

mod context;
mod contract;
mod local;
mod process;
mod serialized;
mod ssh;

#[cfg(test)]
pub(crate) mod fake;

pub use context::{Context, RunOptions};
pub use contract::Runner;
pub use local::LocalRunner;
pub use serialized::SerializedRunner;
pub use ssh::SshRunner;

#[cfg(test)]
pub use contract::MockRunner;
