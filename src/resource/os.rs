//! Node fact gathering and probes.
//!
//! Facts are read from an ordered list of candidate files, first success
//! wins. The probes (`has_command`, SELinux, container detection) turn a
//! non-zero exit into a domain answer and only fail on transport errors.

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::error::{QueryError, Result, RunError};
use crate::plan::{Diff, Resource, State};
use crate::runner::{Context, RunOptions, Runner};

/// A fact gathered from the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Fact {
    /// Machine identifier.
    MachineId,
    /// DMI system UUID.
    SystemUuid,
}

impl Fact {
    /// Name used in state fields and error messages.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::MachineId => "MachineID",
            Self::SystemUuid => "SystemUUID",
        }
    }
}

impl fmt::Display for Fact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Reads one fact from the first readable candidate file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactGatherer {
    fact: Fact,
    candidates: Vec<String>,
}

impl FactGatherer {
    /// Gathers `fact` from `candidates`, tried in order.
    #[must_use]
    pub fn new<I, S>(fact: Fact, candidates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fact,
            candidates: candidates.into_iter().map(Into::into).collect(),
        }
    }

    /// `/etc/machine-id`, then `/var/lib/dbus/machine-id`.
    #[must_use]
    pub fn machine_id() -> Self {
        Self::new(Fact::MachineId, ["/etc/machine-id", "/var/lib/dbus/machine-id"])
    }

    /// `/sys/class/dmi/id/product_uuid`, then `/etc/machine-id`.
    #[must_use]
    pub fn system_uuid() -> Self {
        Self::new(
            Fact::SystemUuid,
            ["/sys/class/dmi/id/product_uuid", "/etc/machine-id"],
        )
    }

    /// The fact this gatherer populates.
    #[must_use]
    pub const fn fact(&self) -> Fact {
        self.fact
    }

    /// Shell command reading the candidates with stderr suppressed.
    #[must_use]
    pub fn read_command(&self) -> String {
        self.candidates
            .iter()
            .map(|path| format!("cat {path} 2>/dev/null"))
            .collect::<Vec<_>>()
            .join(" || ")
    }

    /// Reads the fact and returns its trimmed value.
    ///
    /// # Errors
    ///
    /// [`QueryError::Unreadable`] if no candidate could be read,
    /// [`QueryError::Blank`] if the content was empty, and
    /// [`QueryError::Runner`] if the command could not be run.
    pub async fn gather(
        &self,
        ctx: &Context,
        runner: &dyn Runner,
    ) -> std::result::Result<String, QueryError> {
        let output = match runner
            .run_command(ctx, &self.read_command(), &RunOptions::QUIET)
            .await
        {
            Ok(output) => output,
            Err(RunError::NonZeroExit { .. }) => {
                return Err(QueryError::Unreadable {
                    fact: self.fact.name().to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        let value = output.trim();
        if value.is_empty() {
            return Err(QueryError::Blank {
                fact: self.fact.name().to_string(),
            });
        }
        Ok(value.to_string())
    }
}

/// Facts gathered from a node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OsFacts {
    /// Machine identifier.
    pub machine_id: Option<String>,
    /// DMI system UUID.
    pub system_uuid: Option<String>,
}

impl OsFacts {
    /// Stores the value of `fact`.
    pub fn set(&mut self, fact: Fact, value: String) {
        match fact {
            Fact::MachineId => self.machine_id = Some(value),
            Fact::SystemUuid => self.system_uuid = Some(value),
        }
    }

    /// Returns the value of `fact`, if gathered.
    #[must_use]
    pub fn get(&self, fact: Fact) -> Option<&str> {
        match fact {
            Fact::MachineId => self.machine_id.as_deref(),
            Fact::SystemUuid => self.system_uuid.as_deref(),
        }
    }

    fn to_state(&self) -> State {
        State::new()
            .with_optional(Fact::MachineId.name(), self.machine_id.as_deref())
            .with_optional(Fact::SystemUuid.name(), self.system_uuid.as_deref())
    }
}

/// Whether SELinux tooling is present on the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SeLinuxStatus {
    /// The probes were inconclusive.
    Unknown,
    /// `selinuxenabled` is not available.
    NotInstalled,
    /// `selinuxenabled` is available.
    Installed,
}

/// SELinux enforcement mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SeLinuxMode {
    /// The probes were inconclusive.
    Unknown,
    /// Policy is enforced.
    Enforcing,
    /// Policy violations are only logged.
    Permissive,
    /// SELinux is disabled.
    Disabled,
}

impl fmt::Display for SeLinuxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::NotInstalled => "not installed",
            Self::Installed => "installed",
        };
        f.write_str(s)
    }
}

impl fmt::Display for SeLinuxMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::Enforcing => "enforcing",
            Self::Permissive => "permissive",
            Self::Disabled => "disabled",
        };
        f.write_str(s)
    }
}

/// The operating system of a node, as a read-only resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Os {
    gatherers: Vec<FactGatherer>,
    facts: OsFacts,
}

impl Default for Os {
    fn default() -> Self {
        Self::with_gatherers(vec![FactGatherer::machine_id(), FactGatherer::system_uuid()])
    }
}

impl Os {
    /// An `Os` resource with the default gatherers and no facts yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// An `Os` resource gathering with `gatherers`, in order.
    #[must_use]
    pub const fn with_gatherers(gatherers: Vec<FactGatherer>) -> Self {
        Self {
            gatherers,
            facts: OsFacts {
                machine_id: None,
                system_uuid: None,
            },
        }
    }

    /// Gathers the default facts from the node.
    ///
    /// # Errors
    ///
    /// Returns the first gathering failure.
    pub async fn detect(ctx: &Context, runner: &dyn Runner) -> Result<Self> {
        let mut os = Self::new();
        os.facts = os.gather(ctx, runner).await?;
        Ok(os)
    }

    /// Facts held by this resource.
    #[must_use]
    pub const fn facts(&self) -> &OsFacts {
        &self.facts
    }

    /// Runs every gatherer in order, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns the failing gatherer's [`QueryError`].
    pub async fn gather(
        &self,
        ctx: &Context,
        runner: &dyn Runner,
    ) -> std::result::Result<OsFacts, QueryError> {
        let mut facts = OsFacts::default();
        for gatherer in &self.gatherers {
            match gatherer.gather(ctx, runner).await {
                Ok(value) => {
                    debug!(fact = %gatherer.fact(), value = %value, "gathered fact");
                    facts.set(gatherer.fact(), value);
                }
                Err(e) => {
                    error!(fact = %gatherer.fact(), error = %e, "fact gathering failed");
                    return Err(e);
                }
            }
        }
        Ok(facts)
    }

    /// Returns whether `command` is on the node's `PATH`.
    ///
    /// # Errors
    ///
    /// Fails only if the lookup itself could not be run.
    pub async fn has_command(
        ctx: &Context,
        runner: &dyn Runner,
        command: &str,
    ) -> std::result::Result<bool, QueryError> {
        let probe = format!("command -v -- {command:?} >/dev/null 2>&1");
        match runner.run_command(ctx, &probe, &RunOptions::QUIET).await {
            Ok(_) => Ok(true),
            Err(RunError::NonZeroExit { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Probes SELinux installation and mode.
    ///
    /// Results the probes cannot settle come back as `Unknown`.
    ///
    /// # Errors
    ///
    /// Fails only on transport errors or cancellation.
    pub async fn selinux_status(
        ctx: &Context,
        runner: &dyn Runner,
    ) -> std::result::Result<(SeLinuxStatus, SeLinuxMode), QueryError> {
        const PROBE: &str = "selinuxenabled";

        if !Self::has_command(ctx, runner, PROBE).await? {
            return Ok((SeLinuxStatus::NotInstalled, SeLinuxMode::Unknown));
        }

        match runner.run_command(ctx, PROBE, &RunOptions::QUIET).await {
            Ok(_) => {}
            Err(RunError::NonZeroExit { code: 1, .. }) => {
                return Ok((SeLinuxStatus::Installed, SeLinuxMode::Disabled));
            }
            Err(RunError::NonZeroExit { code, .. }) => {
                warn!(exit_code = code, "selinuxenabled inconclusive");
                return Ok((SeLinuxStatus::Installed, SeLinuxMode::Unknown));
            }
            Err(e) => return Err(e.into()),
        }

        for (name, mode) in [
            ("permissive", SeLinuxMode::Permissive),
            ("enforcing", SeLinuxMode::Enforcing),
        ] {
            match Self::is_selinux_mode(ctx, runner, name).await {
                Ok(true) => return Ok((SeLinuxStatus::Installed, mode)),
                Ok(false) => {}
                Err(QueryError::Runner(e)) if e.is_non_zero_exit() => {
                    warn!(mode = name, exit_code = ?e.exit_code(), "sestatus inconclusive");
                }
                Err(e) => return Err(e),
            }
        }
        Ok((SeLinuxStatus::Installed, SeLinuxMode::Unknown))
    }

    /// Returns whether `sestatus` reports `mode` as the current mode.
    ///
    /// # Errors
    ///
    /// Fails if the probe exits with anything but 0 or 1, or cannot be run.
    pub async fn is_selinux_mode(
        ctx: &Context,
        runner: &dyn Runner,
        mode: &str,
    ) -> std::result::Result<bool, QueryError> {
        let probe = format!("sestatus | grep 'Current mode' | grep {mode}");
        match runner.run_command(ctx, &probe, &RunOptions::QUIET).await {
            Ok(_) => Ok(true),
            Err(RunError::NonZeroExit { code: 1, .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Returns whether the node is a container posing as a VM.
    ///
    /// # Errors
    ///
    /// Fails if the init process environment cannot be read.
    pub async fn is_in_container_vm(
        ctx: &Context,
        runner: &dyn Runner,
    ) -> std::result::Result<bool, QueryError> {
        let environ = runner
            .run_command(ctx, "cat /proc/1/environ", &RunOptions::QUIET)
            .await?;
        Ok(environ.contains("container=docker"))
    }
}

#[async_trait]
impl Resource for Os {
    fn kind(&self) -> &'static str {
        "os"
    }

    fn state(&self) -> State {
        self.facts.to_state()
    }

    async fn query_state(&self, ctx: &Context, runner: &dyn Runner) -> Result<State> {
        Ok(self.gather(ctx, runner).await?.to_state())
    }

    async fn apply(&self, ctx: &Context, runner: &dyn Runner, _diff: &Diff) -> Result<bool> {
        self.gather(ctx, runner).await?;
        Ok(false)
    }
}
