//! Version-pinned package installs.
//!
//! Both variants query the installed version before applying and skip the
//! install when the node already has the declared version. Removing or
//! downgrading a package is not modelled, so `undo` is a no-op.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ApplyError, ConfigError, QueryError, Result, RunError};
use crate::plan::{Diff, Resource, State};
use crate::runner::{Context, RunOptions, Runner};

/// Package-manager family of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PkgType {
    /// yum/rpm based distributions.
    Rpm,
    /// Red Hat Enterprise Linux (rpm family).
    Rhel,
    /// apt/dpkg based distributions.
    Deb,
}

impl PkgType {
    /// Returns true for the rpm family.
    #[must_use]
    pub const fn is_rpm_family(self) -> bool {
        matches!(self, Self::Rpm | Self::Rhel)
    }
}

impl fmt::Display for PkgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Rpm => "rpm",
            Self::Rhel => "rhel",
            Self::Deb => "deb",
        };
        write!(f, "{s}")
    }
}

impl FromStr for PkgType {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rpm" => Ok(Self::Rpm),
            "rhel" => Ok(Self::Rhel),
            "deb" => Ok(Self::Deb),
            _ => Err(ConfigError::InvalidValue {
                field: String::from("pkg_type"),
                value: s.to_string(),
            }),
        }
    }
}

/// Runs a version query; a non-zero exit means "not installed".
async fn installed_version(
    ctx: &Context,
    runner: &dyn Runner,
    command: &str,
) -> std::result::Result<String, QueryError> {
    match runner.run_command(ctx, command, &RunOptions::QUIET).await {
        Ok(output) => Ok(output.trim().to_string()),
        Err(RunError::NonZeroExit { .. }) => Ok(String::new()),
        Err(e) => Err(e.into()),
    }
}

/// Version from `<status> <version>` dpkg output; empty unless the
/// package is fully installed (`ii`). Removed packages that kept their
/// config files (`rc`) still report a version.
fn dpkg_installed_version(output: &str) -> &str {
    match output.split_once(char::is_whitespace) {
        Some(("ii", version)) => version.trim(),
        _ => "",
    }
}

async fn install(
    ctx: &Context,
    runner: &dyn Runner,
    resource: String,
    command: &str,
) -> Result<bool> {
    info!(package = %resource, "installing package");
    runner
        .run_command(ctx, command, &RunOptions::NONE)
        .await
        .map_err(|source| ApplyError::Failed { resource, source })?;
    Ok(true)
}

/// An rpm package pinned to an exact version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rpm {
    name: String,
    version: String,
    disable_excludes: Option<String>,
}

impl Rpm {
    /// Creates a package resource for `name` at `version`.
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            disable_excludes: None,
        }
    }

    /// Repository whose excludes are ignored while installing.
    #[must_use]
    pub fn with_disable_excludes(mut self, repo: impl Into<String>) -> Self {
        self.disable_excludes = Some(repo.into());
        self
    }

    /// Package name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pinned version.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// The install command.
    #[must_use]
    pub fn install_command(&self) -> String {
        match &self.disable_excludes {
            Some(repo) => format!(
                "yum -y install --disableexcludes={repo} {}-{}",
                self.name, self.version
            ),
            None => format!("yum -y install {}-{}", self.name, self.version),
        }
    }

    fn state_with_version(&self, version: &str) -> State {
        State::new()
            .with("name", self.name.as_str())
            .with("version", version)
            .with_optional("disableExcludes", self.disable_excludes.as_deref())
    }
}

#[async_trait]
impl Resource for Rpm {
    fn kind(&self) -> &'static str {
        "rpm"
    }

    fn state(&self) -> State {
        self.state_with_version(&self.version)
    }

    async fn query_state(&self, ctx: &Context, runner: &dyn Runner) -> Result<State> {
        let command = format!("rpm -q --qf '%{{VERSION}}' {}", self.name);
        let version = installed_version(ctx, runner, &command).await?;
        Ok(self.state_with_version(&version))
    }

    async fn apply(&self, ctx: &Context, runner: &dyn Runner, diff: &Diff) -> Result<bool> {
        if *diff.current() == self.state() {
            debug!(package = %self.name, version = %self.version, "already installed");
            return Ok(false);
        }
        install(ctx, runner, format!("rpm {}", self.name), &self.install_command()).await
    }
}

/// A deb package pinned to an exact version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deb {
    name: String,
    version: String,
}

impl Deb {
    /// Creates a package resource for `name` at `version`.
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    /// Package name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pinned version.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// The install command.
    #[must_use]
    pub fn install_command(&self) -> String {
        format!(
            "apt-get install -y --allow-downgrades {}={}",
            self.name, self.version
        )
    }

    fn state_with_version(&self, version: &str) -> State {
        State::new()
            .with("name", self.name.as_str())
            .with("version", version)
    }
}

#[async_trait]
impl Resource for Deb {
    fn kind(&self) -> &'static str {
        "deb"
    }

    fn state(&self) -> State {
        self.state_with_version(&self.version)
    }

    async fn query_state(&self, ctx: &Context, runner: &dyn Runner) -> Result<State> {
        let command = format!(
            "dpkg-query -W -f='${{db:Status-Abbrev}} ${{Version}}' {}",
            self.name
        );
        let output = installed_version(ctx, runner, &command).await?;
        Ok(self.state_with_version(dpkg_installed_version(&output)))
    }

    async fn apply(&self, ctx: &Context, runner: &dyn Runner, diff: &Diff) -> Result<bool> {
        if *diff.current() == self.state() {
            debug!(package = %self.name, version = %self.version, "already installed");
            return Ok(false);
        }
        install(ctx, runner, format!("deb {}", self.name), &self.install_command()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::fake::ScriptedRunner;

    async fn query_then_apply(resource: &dyn Resource, runner: &ScriptedRunner) -> bool {
        let ctx = Context::new();
        let observed = resource
            .query_state(&ctx, runner)
            .await
            .expect("query succeeds");
        let diff = Diff::between(State::EMPTY, observed);
        resource
            .apply(&ctx, runner, &diff)
            .await
            .expect("apply succeeds")
    }

    #[test]
    fn test_install_commands() {
        let rpm = Rpm::new("kubelet", "1.15.3").with_disable_excludes("kubernetes");
        assert_eq!(
            rpm.install_command(),
            "yum -y install --disableexcludes=kubernetes kubelet-1.15.3"
        );
        assert_eq!(Rpm::new("jq", "1.6").install_command(), "yum -y install jq-1.6");
        assert_eq!(
            Deb::new("kubeadm", "1.15.3-00").install_command(),
            "apt-get install -y --allow-downgrades kubeadm=1.15.3-00"
        );
    }

    #[tokio::test]
    async fn test_rpm_skips_install_when_version_present() {
        let rpm = Rpm::new("kubelet", "1.15.3").with_disable_excludes("kubernetes");

        let missing = ScriptedRunner::new().fail_containing("rpm -q", 1);
        assert!(query_then_apply(&rpm, &missing).await);
        assert_eq!(missing.count_containing("yum -y install"), 1);

        let installed = ScriptedRunner::new().on_containing("rpm -q", Ok(String::from("1.15.3")));
        assert!(!query_then_apply(&rpm, &installed).await);
        assert_eq!(installed.count_containing("yum -y install"), 0);
    }

    #[tokio::test]
    async fn test_deb_reinstalls_other_version() {
        let deb = Deb::new("kubectl", "1.15.3-00");

        let older = ScriptedRunner::new().on(
            "dpkg-query -W -f='${db:Status-Abbrev} ${Version}' kubectl",
            Ok(String::from("ii  1.14.1-00\n")),
        );
        assert!(query_then_apply(&deb, &older).await);
        assert_eq!(older.count_containing("kubectl=1.15.3-00"), 1);

        let current =
            ScriptedRunner::new().on_containing("dpkg-query", Ok(String::from("ii  1.15.3-00")));
        assert!(!query_then_apply(&deb, &current).await);
    }

    #[tokio::test]
    async fn test_deb_removed_package_is_not_installed() {
        let deb = Deb::new("kubectl", "1.15.3-00");
        let runner =
            ScriptedRunner::new().on_containing("dpkg-query", Ok(String::from("rc  1.15.3-00\n")));

        let observed = deb
            .query_state(&Context::new(), &runner)
            .await
            .expect("query succeeds");
        assert_eq!(observed.get_str("version"), Some(""));
        assert!(query_then_apply(&deb, &runner).await);
        assert_eq!(runner.count_containing("kubectl=1.15.3-00"), 1);
    }

    #[test]
    fn test_dpkg_status_parsing() {
        assert_eq!(dpkg_installed_version("ii  1.15.3-00"), "1.15.3-00");
        assert_eq!(dpkg_installed_version("rc  1.15.3-00"), "");
        assert_eq!(dpkg_installed_version("iU  1.15.3-00"), "");
        assert_eq!(dpkg_installed_version(""), "");
    }

    #[tokio::test]
    async fn test_query_transport_error_is_an_error() {
        let runner = ScriptedRunner::new()
            .on_containing("rpm -q", Err(RunError::transport("connection reset")));
        let err = Rpm::new("kubelet", "1.15.3")
            .query_state(&Context::new(), &runner)
            .await
            .expect_err("transport failure propagates");
        assert!(matches!(err.run_error(), Some(RunError::Transport { .. })));
    }

    #[test]
    fn test_pkg_type_parse() {
        assert_eq!("RHEL".parse::<PkgType>().expect("valid"), PkgType::Rhel);
        assert!(PkgType::Rhel.is_rpm_family());
        assert!(!PkgType::Deb.is_rpm_family());
        assert!("apk".parse::<PkgType>().is_err());
        assert_eq!(PkgType::Deb.to_string(), "deb");
    }
}
