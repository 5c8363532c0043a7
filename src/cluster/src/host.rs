//! Host identity detection.
//!
//! The distribution family decides which package backend every
//! [`CapabilityManager`](crate::capability::CapabilityManager) uses. It is probed
//! once at startup from marker files and injected from there on.

use crate::error::Result;
use crate::exec::{CommandRunner, CommandSpec};
use std::path::Path;

/// Marker file present on RHEL, CentOS, Oracle Linux and friends.
const REDHAT_RELEASE: &str = "etc/redhat-release";

/// Marker directory installed by the Oracle Cloud agent.
const ORACLE_CLOUD_AGENT: &str = "etc/oracle-cloud-agent";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostFamily {
    Debian,
    RedHat,
}

impl std::fmt::Display for HostFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostFamily::Debian => write!(f, "debian"),
            HostFamily::RedHat => write!(f, "redhat"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostInfo {
    pub family: HostFamily,
    pub oracle_cloud: bool,
}

impl HostInfo {
    pub fn detect() -> Self {
        Self::detect_at(Path::new("/"))
    }

    /// Detect against an alternate filesystem root (used by tests).
    pub fn detect_at(root: &Path) -> Self {
        let family = if root.join(REDHAT_RELEASE).exists() {
            HostFamily::RedHat
        } else {
            HostFamily::Debian
        };
        let oracle_cloud = root.join(ORACLE_CLOUD_AGENT).exists();

        tracing::debug!(
            "[HostInfo] Detected family={} oracle_cloud={}",
            family,
            oracle_cloud
        );

        Self {
            family,
            oracle_cloud,
        }
    }
}

pub fn is_root() -> bool {
    nix::unistd::Uid::effective().is_root()
}

/// Login name of the invoking user (`LOGNAME`, then `USER`).
pub fn login_name() -> Option<String> {
    std::env::var("LOGNAME")
        .or_else(|_| std::env::var("USER"))
        .ok()
        .filter(|s| !s.is_empty())
}

/// Whether `user` is a member of `group`, per `id -nG`. An unknown user is not a member.
pub async fn user_in_group(runner: &dyn CommandRunner, user: &str, group: &str) -> Result<bool> {
    let output = runner.capture(&CommandSpec::new("id").args(["-nG", user])).await?;
    Ok(output.success() && output.stdout.split_whitespace().any(|g| g == group))
}
