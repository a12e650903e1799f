//! CLI module for the nodeplan tool.
//!
//! This module provides the command-line interface for planning and
//! executing node upgrades.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat, StateCommands, UpgradeArgs};
pub use output::{FactsSummary, OutputFormatter};
