//! Kubernetes node upgrade.
//!
//! The plan is a strict chain: unlock the version pin, install kubelet,
//! kubectl and kubeadm at the target version, re-lock, run the role's
//! `kubeadm upgrade` command, then restart the kubelet.

use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ConfigError, Result};
use crate::plan::{Plan, PlanBuilder, depend_on};
use crate::resource::{Deb, PkgType, Rpm, Run};
use crate::version;

/// Secondary control-plane nodes below this version need the
/// `experimental-control-plane` flag.
pub const SECONDARY_CONTROL_PLANE_FLAG_BELOW: &str = "v1.16.0";

/// Names of the upgrade plan steps.
pub mod step {
    /// Removes the package version pin.
    pub const UNLOCK: &str = "upgrade:node-unlock-kubernetes";
    /// Installs kubelet.
    pub const KUBELET: &str = "upgrade:node-kubelet";
    /// Installs kubectl.
    pub const KUBECTL: &str = "upgrade:node-kubectl";
    /// Installs kubeadm.
    pub const KUBEADM: &str = "upgrade:node-install-kubeadm";
    /// Restores the package version pin.
    pub const LOCK: &str = "upgrade:node-lock-kubernetes";
    /// Runs the role-specific `kubeadm upgrade`.
    pub const KUBEADM_UPGRADE: &str = "upgrade:node-kubeadm-upgrade";
    /// Restarts the kubelet service.
    pub const RESTART_KUBELET: &str = "upgrade:node-restart-kubelet";
}

/// Role of a node in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum NodeRole {
    /// The control-plane node the cluster was initialised on.
    OriginalControlPlane,
    /// Any other control-plane node.
    SecondaryControlPlane,
    /// A worker node.
    Worker,
}

impl NodeRole {
    fn upgrade_command(self, target: &str) -> String {
        match self {
            Self::OriginalControlPlane => {
                format!("kubeadm upgrade plan && kubeadm upgrade apply -y {target}")
            }
            Self::SecondaryControlPlane => {
                // Comparison errors fall through to the newer command.
                let legacy = version::less_than(target, SECONDARY_CONTROL_PLANE_FLAG_BELOW)
                    .unwrap_or(false);
                if legacy {
                    String::from("kubeadm upgrade node experimental-control-plane")
                } else {
                    String::from("kubeadm upgrade node")
                }
            }
            Self::Worker => String::from("kubeadm upgrade node phase kubelet-config"),
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::OriginalControlPlane => "original-control-plane",
            Self::SecondaryControlPlane => "secondary-control-plane",
            Self::Worker => "worker",
        };
        f.write_str(s)
    }
}

impl FromStr for NodeRole {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "original-control-plane" => Ok(Self::OriginalControlPlane),
            "secondary-control-plane" => Ok(Self::SecondaryControlPlane),
            "worker" => Ok(Self::Worker),
            _ => Err(ConfigError::InvalidValue {
                field: String::from("role"),
                value: s.to_string(),
            }),
        }
    }
}

/// Builds the upgrade plan of one node to Kubernetes `target`.
///
/// The returned [`Plan`] is itself a resource and can be nested into a
/// larger plan.
///
/// # Errors
///
/// Returns a build error if the plan is malformed.
pub fn build_upgrade_plan(pkg_type: PkgType, target: &str, role: NodeRole) -> Result<Plan> {
    let target = target.trim();
    let package_version = version::strip_prefix(target);
    info!(%pkg_type, %role, version = %target, "building upgrade plan");

    let mut b = PlanBuilder::new();

    if pkg_type.is_rpm_family() {
        b.add_resource(step::UNLOCK, Run::new("yum versionlock delete 'kube*' || true"), []);
        b.add_resource(
            step::KUBELET,
            Rpm::new("kubelet", package_version).with_disable_excludes("kubernetes"),
            [depend_on([step::UNLOCK])],
        );
        b.add_resource(
            step::KUBECTL,
            Rpm::new("kubectl", package_version).with_disable_excludes("kubernetes"),
            [depend_on([step::KUBELET])],
        );
        b.add_resource(
            step::KUBEADM,
            Rpm::new("kubeadm", package_version).with_disable_excludes("kubernetes"),
            [depend_on([step::KUBECTL])],
        );
        b.add_resource(
            step::LOCK,
            Run::new("yum versionlock add 'kube*' || true"),
            [depend_on([step::KUBEADM])],
        );
    } else {
        let deb_version = format!("{package_version}-00");
        b.add_resource(step::UNLOCK, Run::new("apt-mark unhold 'kube*' || true"), []);
        b.add_resource(
            step::KUBELET,
            Deb::new("kubelet", deb_version.as_str()),
            [depend_on([step::UNLOCK])],
        );
        b.add_resource(
            step::KUBECTL,
            Deb::new("kubectl", deb_version.as_str()),
            [depend_on([step::KUBELET])],
        );
        b.add_resource(
            step::KUBEADM,
            Deb::new("kubeadm", deb_version.as_str()),
            [depend_on([step::KUBECTL])],
        );
        b.add_resource(
            step::LOCK,
            Run::new("apt-mark hold 'kube*' || true"),
            [depend_on([step::KUBEADM])],
        );
    }

    let upgrade = role.upgrade_command(target);
    debug!(command = %upgrade, "kubeadm upgrade step");
    b.add_resource(step::KUBEADM_UPGRADE, Run::new(upgrade), [depend_on([step::LOCK])]);
    b.add_resource(
        step::RESTART_KUBELET,
        Run::new("systemctl restart kubelet"),
        [depend_on([step::KUBEADM_UPGRADE])],
    );

    Ok(b.plan()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::PlanExecutor;
    use crate::runner::Context;
    use crate::runner::fake::ScriptedRunner;

    fn script(plan: &Plan, name: &str) -> String {
        plan.node(name)
            .and_then(|n| n.resource().state().get_str("script").map(String::from))
            .unwrap_or_else(|| panic!("{name} is not a run step"))
    }

    #[tokio::test]
    async fn test_rpm_original_control_plane_sequence() {
        let plan = build_upgrade_plan(PkgType::Rpm, "v1.15.3", NodeRole::OriginalControlPlane)
            .expect("plan builds");

        assert_eq!(
            plan.names(),
            vec![
                step::UNLOCK,
                step::KUBELET,
                step::KUBECTL,
                step::KUBEADM,
                step::LOCK,
                step::KUBEADM_UPGRADE,
                step::RESTART_KUBELET,
            ]
        );
        for pair in plan.names().windows(2) {
            assert_eq!(
                plan.dependencies(pair[1]).expect("registered"),
                &[pair[0].to_string()]
            );
        }

        let runner = ScriptedRunner::new().fail_containing("rpm -q", 1);
        let report = PlanExecutor::new()
            .execute(&plan, &Context::new(), &runner)
            .await
            .expect("execution runs");
        assert!(report.success());

        let commands: Vec<String> = runner
            .calls()
            .into_iter()
            .filter(|c| !c.starts_with("rpm -q"))
            .collect();
        assert_eq!(
            commands,
            vec![
                "yum versionlock delete 'kube*' || true",
                "yum -y install --disableexcludes=kubernetes kubelet-1.15.3",
                "yum -y install --disableexcludes=kubernetes kubectl-1.15.3",
                "yum -y install --disableexcludes=kubernetes kubeadm-1.15.3",
                "yum versionlock add 'kube*' || true",
                "kubeadm upgrade plan && kubeadm upgrade apply -y v1.15.3",
                "systemctl restart kubelet",
            ]
        );
    }

    #[test]
    fn test_secondary_control_plane_legacy_flag() {
        let old = build_upgrade_plan(PkgType::Rhel, "v1.15.3", NodeRole::SecondaryControlPlane)
            .expect("plan builds");
        assert_eq!(
            script(&old, step::KUBEADM_UPGRADE),
            "kubeadm upgrade node experimental-control-plane"
        );

        let new = build_upgrade_plan(PkgType::Rhel, "v1.17.0", NodeRole::SecondaryControlPlane)
            .expect("plan builds");
        assert_eq!(script(&new, step::KUBEADM_UPGRADE), "kubeadm upgrade node");
    }

    #[test]
    fn test_unparsable_version_fails_open() {
        let plan = build_upgrade_plan(PkgType::Rpm, "latest", NodeRole::SecondaryControlPlane)
            .expect("plan builds");
        assert_eq!(script(&plan, step::KUBEADM_UPGRADE), "kubeadm upgrade node");
    }

    #[test]
    fn test_deb_worker() {
        let plan = build_upgrade_plan(PkgType::Deb, "v1.16.2", NodeRole::Worker)
            .expect("plan builds");

        assert_eq!(script(&plan, step::UNLOCK), "apt-mark unhold 'kube*' || true");
        assert_eq!(script(&plan, step::LOCK), "apt-mark hold 'kube*' || true");
        assert_eq!(
            script(&plan, step::KUBEADM_UPGRADE),
            "kubeadm upgrade node phase kubelet-config"
        );
        let kubeadm = plan.node(step::KUBEADM).expect("kubeadm step").resource();
        assert_eq!(kubeadm.kind(), "deb");
        assert_eq!(kubeadm.state().get_str("version"), Some("1.16.2-00"));
    }

    #[test]
    fn test_role_parse() {
        assert_eq!(
            "secondary-control-plane".parse::<NodeRole>().expect("valid"),
            NodeRole::SecondaryControlPlane
        );
        assert!("master".parse::<NodeRole>().is_err());
        assert_eq!(NodeRole::Worker.to_string(), "worker");
    }
}
