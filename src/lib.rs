// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # nodeplan
//!
//! Dependency-ordered, idempotent and undoable resource plans for
//! provisioning and upgrading Kubernetes nodes over remote shell commands.
//!
//! ## Overview
//!
//! A node is described as a set of named resources ("install kubelet
//! 1.15.3", "run `kubeadm upgrade node`", "gather the machine id"), each
//! depending on others. The engine:
//!
//! - Validates the dependency graph into a [`Plan`](plan::Plan)
//! - Queries each resource's live state and diffs it against the last
//!   recorded one
//! - Applies resources in dependency order, with bounded concurrency and
//!   one command at a time per node
//! - Undoes changed resources in reverse order when a step fails
//!
//! ## Modules
//!
//! - [`runner`]: the command boundary (local shell, ssh, per-node serialization)
//! - [`plan`]: states, diffs, the resource contract, builder and executor
//! - [`resource`]: scripts, packages and OS facts
//! - [`recipe`]: the kubeadm upgrade plan
//! - [`cluster`]: the reconciliation boundary for cluster objects
//! - [`config`]: configuration parsing and validation
//! - [`state`]: per-node records of observed states
//! - [`cli`]: command-line interface
//!
//! ## Example
//!
//! ```yaml
//! node:
//!   host: 10.0.0.12
//!   user: root
//!   pkg_type: rpm
//!   role: secondary-control-plane
//!   version: v1.15.3
//!
//! execution:
//!   rollback: true
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod cluster;
pub mod config;
pub mod error;
pub mod plan;
pub mod recipe;
pub mod resource;
pub mod runner;
pub mod state;
pub mod version;

// ============================================================================
// Re-exports
// ============================================================================

pub use config::{ConfigHasher, ConfigParser, ConfigValidator, NodePlanConfig};
pub use error::{NodePlanError, Result};
pub use plan::{ExecutionReport, Plan, PlanBuilder, PlanExecutor, Resource, State};
pub use recipe::{NodeRole, build_upgrade_plan};
pub use runner::{Context, LocalRunner, Runner, SshRunner};
pub use state::{LocalStateStore, NodeRecord, StateStore};
