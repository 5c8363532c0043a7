//! Package/service backends for [`CapabilityManager`](super::CapabilityManager).
use super::SnapSpec;
use crate::error::{ClusterError, Result};
use crate::exec::{require_success, CommandRunner, CommandSpec};
use crate::host::HostFamily;
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait PackageBackend: Send + Sync {
    async fn is_package_installed(&self, name: &str) -> Result<bool>;
    async fn install_packages(&self, names: &[String]) -> Result<()>;

    async fn is_snap_installed(&self, name: &str) -> Result<bool>;
    async fn install_snap(&self, snap: &SnapSpec) -> Result<()>;

    async fn is_service_enabled(&self, name: &str) -> Result<bool>;
    async fn enable_service(&self, name: &str) -> Result<()>;
    async fn is_service_running(&self, name: &str) -> Result<bool>;
    async fn start_service(&self, name: &str) -> Result<()>;
}

/// Host backend: apt/dpkg or dnf/rpm for native packages, snap, systemctl.
/// The variant is fixed at construction from the detected [`HostFamily`].
pub struct SystemBackend {
    family: HostFamily,
    runner: Arc<dyn CommandRunner>,
}

impl SystemBackend {
    pub fn new(family: HostFamily, runner: Arc<dyn CommandRunner>) -> Self {
        Self { family, runner }
    }

    pub fn family(&self) -> HostFamily {
        self.family
    }

    async fn succeeds(&self, spec: CommandSpec) -> Result<bool> {
        Ok(self.runner.capture(&spec).await?.success())
    }

    async fn run_checked(&self, spec: CommandSpec) -> Result<()> {
        let code = self.runner.interactive(&spec).await?;
        if code != 0 {
            return Err(ClusterError::ExternalTool {
                command: spec.display_line(),
                code,
                stderr: String::new(),
            });
        }
        Ok(())
    }
}

/// Name `rpm -q` knows a package by. URL installs are queried by their release name.
pub fn rpm_query_name(name: &str) -> &str {
    if !name.contains("://") {
        return name;
    }
    let file = name.rsplit('/').next().unwrap_or(name);
    let stem = file.strip_suffix(".rpm").unwrap_or(file);
    stem.split("-latest").next().unwrap_or(stem)
}

#[async_trait]
impl PackageBackend for SystemBackend {
    async fn is_package_installed(&self, name: &str) -> Result<bool> {
        match self.family {
            HostFamily::Debian => {
                let spec = CommandSpec::new("dpkg-query").args(["-W", "-f=${Status}", name]);
                let output = self.runner.capture(&spec).await?;
                Ok(output.success() && output.stdout.contains("install ok installed"))
            }
            HostFamily::RedHat => {
                self.succeeds(CommandSpec::new("rpm").args(["-q", rpm_query_name(name)]))
                    .await
            }
        }
    }

    async fn install_packages(&self, names: &[String]) -> Result<()> {
        let spec = match self.family {
            HostFamily::Debian => CommandSpec::new("apt-get").args(["install", "-y", "-q"]),
            HostFamily::RedHat => CommandSpec::new("dnf").args(["install", "-y"]),
        }
        .args(names.iter().cloned());
        self.run_checked(spec).await
    }

    async fn is_snap_installed(&self, name: &str) -> Result<bool> {
        self.succeeds(CommandSpec::new("snap").args(["list", name])).await
    }

    async fn install_snap(&self, snap: &SnapSpec) -> Result<()> {
        let mut spec = CommandSpec::new("snap").args(["install", snap.name.as_str()]);
        if let Some(channel) = &snap.channel {
            spec = spec.arg(format!("--channel={}", channel));
        }
        self.run_checked(spec.args(snap.args.iter().cloned())).await
    }

    async fn is_service_enabled(&self, name: &str) -> Result<bool> {
        self.succeeds(CommandSpec::new("systemctl").args(["is-enabled", "--quiet", name]))
            .await
    }

    async fn enable_service(&self, name: &str) -> Result<()> {
        let spec = CommandSpec::new("systemctl").args(["enable", name]);
        let output = self.runner.capture(&spec).await?;
        require_success(&spec, output).map(|_| ())
    }

    async fn is_service_running(&self, name: &str) -> Result<bool> {
        self.succeeds(CommandSpec::new("systemctl").args(["is-active", "--quiet", name]))
            .await
    }

    async fn start_service(&self, name: &str) -> Result<()> {
        let spec = CommandSpec::new("systemctl").args(["start", name]);
        let output = self.runner.capture(&spec).await?;
        require_success(&spec, output).map(|_| ())
    }
}
