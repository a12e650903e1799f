//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::recipe::NodeRole;
use crate::resource::PkgType;

/// nodeplan - dependency-ordered, undoable plans for Kubernetes nodes.
#[derive(Parser, Debug)]
#[command(name = "nodeplan")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true, env = "NODEPLAN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build the upgrade plan and print it without touching the node.
    Plan(UpgradeArgs),

    /// Build and execute the upgrade plan against the configured node.
    Upgrade {
        /// Plan selection.
        #[command(flatten)]
        args: UpgradeArgs,

        /// Undo changed steps if a step fails.
        #[arg(long)]
        rollback: bool,

        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Gather and print OS facts of the node.
    Facts,

    /// Execute a single script through the plan executor.
    Run {
        /// Script to run on the node.
        script: String,

        /// Script undoing the first one, recorded with the step.
        #[arg(long)]
        undo: Option<String>,
    },

    /// Manage the stored node record.
    State {
        /// State subcommand.
        #[command(subcommand)]
        command: StateCommands,
    },
}

/// Selection of the upgrade plan; missing values come from the configuration.
#[derive(Args, Debug, Clone)]
pub struct UpgradeArgs {
    /// Target Kubernetes version (e.g. v1.15.3).
    #[arg(long = "version")]
    pub target: Option<String>,

    /// Package manager family of the node.
    #[arg(long, value_enum)]
    pub pkg_type: Option<PkgType>,

    /// Role of the node in the control plane.
    #[arg(long, value_enum)]
    pub role: Option<NodeRole>,
}

/// State management subcommands.
#[derive(Subcommand, Debug)]
pub enum StateCommands {
    /// Show the stored node record.
    Show,

    /// Delete the stored node record and lock.
    Clear {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Release the node lock.
    Unlock {
        /// Lock ID to release.
        #[arg(long)]
        lock_id: Option<String>,

        /// Release whatever lock is present.
        #[arg(long)]
        force: bool,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_upgrade() {
        let cli = Cli::try_parse_from([
            "nodeplan",
            "--output",
            "json",
            "upgrade",
            "--version",
            "v1.15.3",
            "--pkg-type",
            "deb",
            "--role",
            "secondary-control-plane",
            "--rollback",
            "-y",
        ])
        .expect("valid arguments");

        assert_eq!(cli.output, OutputFormat::Json);
        let Commands::Upgrade { args, rollback, yes } = cli.command else {
            panic!("expected upgrade");
        };
        assert_eq!(args.target.as_deref(), Some("v1.15.3"));
        assert_eq!(args.pkg_type, Some(PkgType::Deb));
        assert_eq!(args.role, Some(NodeRole::SecondaryControlPlane));
        assert!(rollback);
        assert!(yes);
    }

    #[test]
    fn test_parse_run_with_undo() {
        let cli = Cli::try_parse_from(["nodeplan", "run", "touch /tmp/x", "--undo", "rm -f /tmp/x"])
            .expect("valid arguments");

        let Commands::Run { script, undo } = cli.command else {
            panic!("expected run");
        };
        assert_eq!(script, "touch /tmp/x");
        assert_eq!(undo.as_deref(), Some("rm -f /tmp/x"));
    }

    #[test]
    fn test_unknown_role_rejected() {
        let result = Cli::try_parse_from(["nodeplan", "plan", "--role", "master"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
