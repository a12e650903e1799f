//! Plan recipes for node operations.

mod upgrade;

pub use upgrade::{
    NodeRole, SECONDARY_CONTROL_PLANE_FLAG_BELOW, build_upgrade_plan, step,
};
