//! The declarative plan engine.
//!
//! This module provides:
//! - [`State`] and [`Diff`] snapshots used for idempotency decisions
//! - The [`Resource`] capability set
//! - [`PlanBuilder`], which validates a dependency graph into a [`Plan`]
//! - [`PlanExecutor`], which applies a plan and keeps its undo log

mod builder;
mod executor;
mod graph;
mod resource;
mod state;

pub use builder::{DependOn, PlanBuilder, depend_on};
pub use executor::{
    DEFAULT_MAX_CONCURRENCY, ExecutionRecord, ExecutionReport, PlanExecutor, UndoFailure,
};
pub use graph::{Plan, PlanNode};
pub use resource::Resource;
pub use state::{Diff, FieldChange, State};
