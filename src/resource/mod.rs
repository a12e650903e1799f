//! Concrete resource variants.
//!
//! - [`Run`]: a script that always executes, with optional undo
//! - [`Rpm`] and [`Deb`]: version-pinned package installs
//! - [`Os`]: read-only gathering of node facts and probes

mod os;
mod package;
mod run;

use std::sync::{Arc, PoisonError, RwLock};

pub use os::{Fact, FactGatherer, Os, OsFacts, SeLinuxMode, SeLinuxStatus};
pub use package::{Deb, PkgType, Rpm};
pub use run::Run;

/// Shared cell receiving the stdout of a [`Run`] for later resources.
#[derive(Debug, Clone, Default)]
pub struct OutputSlot(Arc<RwLock<Option<String>>>);

impl OutputSlot {
    /// Creates an empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `output`, replacing any previous value.
    pub fn set(&self, output: impl Into<String>) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = Some(output.into());
    }

    /// Returns the stored output, if any.
    #[must_use]
    pub fn get(&self) -> Option<String> {
        self.0.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}
