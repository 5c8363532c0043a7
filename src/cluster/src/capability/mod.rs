//! Idempotent control over one external dependency (packages, snaps, services).
mod backend;

pub use backend::{rpm_query_name, PackageBackend, SystemBackend};

use crate::error::Result;
use crate::host::HostFamily;
use std::sync::Arc;

/// EPEL release package, needed for snapd on RedHat-family hosts.
const EPEL_RELEASE_RPM: &str =
    "https://dl.fedoraproject.org/pub/epel/epel-release-latest-8.noarch.rpm";

/// One snap to install: `snap install <name> [--channel <channel>] [args...]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapSpec {
    pub name: String,
    pub args: Vec<String>,
    pub channel: Option<String>,
}

impl SnapSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
            channel: None,
        }
    }

    pub fn classic(name: impl Into<String>) -> Self {
        Self {
            args: vec!["--classic".to_string()],
            ..Self::new(name)
        }
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }
}

/// What "installed" means for one dependency.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilityTarget {
    pub packages: Vec<String>,
    pub snaps: Vec<SnapSpec>,
    pub services: Vec<String>,
}

impl CapabilityTarget {
    pub fn packages<I, S>(packages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            packages: packages.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn snaps(snaps: impl IntoIterator<Item = SnapSpec>) -> Self {
        Self {
            snaps: snaps.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn with_services<I, S>(mut self, services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.services = services.into_iter().map(Into::into).collect();
        self
    }
}

pub fn snapd_target(family: HostFamily) -> CapabilityTarget {
    match family {
        HostFamily::RedHat => CapabilityTarget::packages([EPEL_RELEASE_RPM, "snapd"]),
        HostFamily::Debian => CapabilityTarget::packages(["snapd"]),
    }
    .with_services(["snapd"])
}

pub fn hypervisor_target() -> CapabilityTarget {
    CapabilityTarget::snaps([SnapSpec::new("lxd").with_channel("latest")])
}

pub fn controlplane_target() -> CapabilityTarget {
    CapabilityTarget::snaps([SnapSpec::classic("juju")])
}

pub fn builder_target() -> CapabilityTarget {
    CapabilityTarget::snaps([SnapSpec::classic("charmcraft")])
}

pub fn extras_target() -> CapabilityTarget {
    CapabilityTarget::packages(["terminator"])
}

/// Drives one [`CapabilityTarget`] through a [`PackageBackend`].
///
/// Every mutator only touches items not yet in the wanted state, so calling it
/// on a satisfied target makes no mutating backend call. Success is never
/// inferred from a tool's exit code: callers re-check the matching probe.
pub struct CapabilityManager {
    name: String,
    target: CapabilityTarget,
    backend: Arc<dyn PackageBackend>,
}

impl CapabilityManager {
    pub fn new(
        name: impl Into<String>,
        target: CapabilityTarget,
        backend: Arc<dyn PackageBackend>,
    ) -> Self {
        Self {
            name: name.into(),
            target,
            backend,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> &CapabilityTarget {
        &self.target
    }

    async fn missing_packages(&self) -> Result<Vec<String>> {
        let mut missing = Vec::new();
        for package in &self.target.packages {
            if !self.backend.is_package_installed(package).await? {
                missing.push(package.clone());
            }
        }
        Ok(missing)
    }

    async fn missing_snaps(&self) -> Result<Vec<&SnapSpec>> {
        let mut missing = Vec::new();
        for snap in &self.target.snaps {
            if !self.backend.is_snap_installed(&snap.name).await? {
                missing.push(snap);
            }
        }
        Ok(missing)
    }

    pub async fn is_installed(&self) -> Result<bool> {
        Ok(self.missing_packages().await?.is_empty() && self.missing_snaps().await?.is_empty())
    }

    pub async fn install(&self) -> Result<()> {
        let packages = self.missing_packages().await?;
        if !packages.is_empty() {
            tracing::info!(
                "[CapabilityManager] {}: installing packages {}",
                self.name,
                packages.join(" ")
            );
            self.backend.install_packages(&packages).await?;
        }

        for snap in self.missing_snaps().await? {
            tracing::info!("[CapabilityManager] {}: installing snap {}", self.name, snap.name);
            self.backend.install_snap(snap).await?;
        }
        Ok(())
    }

    pub async fn is_enabled(&self) -> Result<bool> {
        for service in &self.target.services {
            if !self.backend.is_service_enabled(service).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub async fn enable(&self) -> Result<()> {
        for service in &self.target.services {
            if !self.backend.is_service_enabled(service).await? {
                tracing::info!("[CapabilityManager] {}: enabling {}", self.name, service);
                self.backend.enable_service(service).await?;
            }
        }
        Ok(())
    }

    pub async fn is_running(&self) -> Result<bool> {
        for service in &self.target.services {
            if !self.backend.is_service_running(service).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub async fn start(&self) -> Result<()> {
        for service in &self.target.services {
            if !self.backend.is_service_running(service).await? {
                tracing::info!("[CapabilityManager] {}: starting {}", self.name, service);
                self.backend.start_service(service).await?;
            }
        }
        Ok(())
    }
}
