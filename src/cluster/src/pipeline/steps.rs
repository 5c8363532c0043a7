//! Concrete host setup steps, in dependency order.
use super::{PipelineStep, SetupPipeline};
use crate::capability::{
    builder_target, controlplane_target, extras_target, hypervisor_target, snapd_target,
    CapabilityManager, PackageBackend,
};
use crate::controlplane::ControlPlane;
use crate::error::Result;
use crate::exec::{require_success, CommandRunner, CommandSpec};
use crate::gate::ConfirmationGate;
use crate::host::{user_in_group, HostFamily, HostInfo};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

/// Group granting access to the hypervisor socket.
pub const HYPERVISOR_GROUP: &str = "lxd";
const HYPERVISOR_BRIDGE: &str = "lxdbr0";
/// snapd's mount root on RedHat-family hosts.
pub const SNAPD_SNAP_DIR: &str = "/var/lib/snapd/snap";

/// Everything the setup steps share. Built once per run.
pub struct SetupContext {
    pub host: HostInfo,
    pub runner: Arc<dyn CommandRunner>,
    pub backend: Arc<dyn PackageBackend>,
    pub controlplane: Arc<ControlPlane>,
    pub gate: Arc<dyn ConfirmationGate>,
    /// Unprivileged operator who will drive the cluster.
    pub operator: String,
}

/// Install a capability and, if it manages services, make sure they are enabled and running.
pub struct CapabilityStep {
    name: String,
    manager: CapabilityManager,
}

impl CapabilityStep {
    pub fn new(manager: CapabilityManager) -> Self {
        Self {
            name: manager.name().to_string(),
            manager,
        }
    }
}

#[async_trait]
impl PipelineStep for CapabilityStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(&self) -> Result<()> {
        self.manager.install().await?;
        if !self.manager.target().services.is_empty() {
            self.manager.enable().await?;
            self.manager.start().await?;
        }
        Ok(())
    }

    async fn verify(&self) -> Result<bool> {
        Ok(self.manager.is_installed().await? && self.manager.is_running().await?)
    }
}

/// snapd, plus the `/snap` symlink RedHat-family hosts lack.
pub struct SnapdStep {
    manager: CapabilityManager,
    family: HostFamily,
    snap_root: PathBuf,
}

impl SnapdStep {
    pub fn new(manager: CapabilityManager, family: HostFamily) -> Self {
        Self {
            manager,
            family,
            snap_root: PathBuf::from("/snap"),
        }
    }

    /// Where the `/snap` link is created on RedHat-family hosts.
    pub fn with_snap_root(mut self, snap_root: impl Into<PathBuf>) -> Self {
        self.snap_root = snap_root.into();
        self
    }
}

#[async_trait]
impl PipelineStep for SnapdStep {
    fn name(&self) -> &str {
        self.manager.name()
    }

    async fn apply(&self) -> Result<()> {
        self.manager.install().await?;

        if self.family == HostFamily::RedHat && self.snap_root.symlink_metadata().is_err() {
            tracing::info!(
                "[SnapdStep] Linking {} to {}",
                self.snap_root.display(),
                SNAPD_SNAP_DIR
            );
            std::os::unix::fs::symlink(SNAPD_SNAP_DIR, &self.snap_root)?;
        }

        if !self.manager.is_running().await? {
            self.manager.enable().await?;
            self.manager.start().await?;
        }
        Ok(())
    }

    async fn verify(&self) -> Result<bool> {
        Ok(self.manager.is_installed().await? && self.manager.is_running().await?)
    }
}

/// Hypervisor snap plus operator membership in its access group.
pub struct HypervisorStep {
    manager: CapabilityManager,
    runner: Arc<dyn CommandRunner>,
    user: String,
}

impl HypervisorStep {
    pub fn new(manager: CapabilityManager, runner: Arc<dyn CommandRunner>, user: String) -> Self {
        Self {
            manager,
            runner,
            user,
        }
    }

    async fn user_in_group(&self) -> Result<bool> {
        user_in_group(self.runner.as_ref(), &self.user, HYPERVISOR_GROUP).await
    }
}

#[async_trait]
impl PipelineStep for HypervisorStep {
    fn name(&self) -> &str {
        self.manager.name()
    }

    async fn apply(&self) -> Result<()> {
        self.manager.install().await?;
        if !self.manager.is_enabled().await? {
            self.manager.enable().await?;
        }
        if !self.manager.is_running().await? {
            self.manager.start().await?;
        }

        if !self.user_in_group().await? {
            tracing::info!("[HypervisorStep] Adding {} to group {}", self.user, HYPERVISOR_GROUP);
            let spec = CommandSpec::new("usermod").args([
                "-a",
                "-G",
                HYPERVISOR_GROUP,
                self.user.as_str(),
            ]);
            let output = self.runner.capture(&spec).await?;
            require_success(&spec, output)?;
        }
        Ok(())
    }

    async fn verify(&self) -> Result<bool> {
        Ok(self.manager.is_installed().await? && self.user_in_group().await?)
    }
}

/// Cloud-provider adjustments. Only Oracle Cloud needs any: its default
/// nftables rules drop the hypervisor bridge's traffic.
pub struct CloudStep {
    host: HostInfo,
    runner: Arc<dyn CommandRunner>,
}

impl CloudStep {
    pub fn new(host: HostInfo, runner: Arc<dyn CommandRunner>) -> Self {
        Self { host, runner }
    }

    fn nft_deletions(&self) -> Vec<CommandSpec> {
        match self.host.family {
            HostFamily::RedHat => vec![CommandSpec::new("nft").args([
                "delete", "table", "inet", "firewalld",
            ])],
            HostFamily::Debian => vec![
                CommandSpec::new("nft").args(["delete", "rule", "filter", "INPUT", "handle", "10"]),
                CommandSpec::new("nft").args([
                    "delete", "rule", "filter", "FORWARD", "handle", "11",
                ]),
            ],
        }
    }
}

#[async_trait]
impl PipelineStep for CloudStep {
    fn name(&self) -> &str {
        "cloud"
    }

    async fn apply(&self) -> Result<()> {
        if !self.host.oracle_cloud {
            tracing::debug!("[CloudStep] No cloud-specific setup needed");
            return Ok(());
        }

        tracing::info!("[CloudStep] Setting up for Oracle Cloud");
        let spec = CommandSpec::new("lxc").args([
            "network",
            "set",
            HYPERVISOR_BRIDGE,
            "ipv4.firewall",
            "true",
        ]);
        let output = self.runner.capture(&spec).await?;
        require_success(&spec, output)?;

        // Rules may already be gone on a re-run.
        for spec in self.nft_deletions() {
            match self.runner.capture(&spec).await {
                Ok(o) if o.success() => {}
                Ok(o) => tracing::info!(
                    "[CloudStep] `{}` skipped: {}",
                    spec.display_line(),
                    o.stderr.trim()
                ),
                Err(e) => tracing::warn!("[CloudStep] `{}` failed: {}", spec.display_line(), e),
            }
        }
        Ok(())
    }

    async fn verify(&self) -> Result<bool> {
        if !self.host.oracle_cloud {
            return Ok(true);
        }
        let output = self
            .runner
            .capture(&CommandSpec::new("lxc").args([
                "network",
                "get",
                HYPERVISOR_BRIDGE,
                "ipv4.firewall",
            ]))
            .await?;
        Ok(output.success() && output.stdout.trim() == "true")
    }
}

/// Control-plane client install, then controller bootstrap and model creation.
pub struct ControlPlaneStep {
    manager: CapabilityManager,
    controlplane: Arc<ControlPlane>,
}

impl ControlPlaneStep {
    pub fn new(manager: CapabilityManager, controlplane: Arc<ControlPlane>) -> Self {
        Self {
            manager,
            controlplane,
        }
    }
}

#[async_trait]
impl PipelineStep for ControlPlaneStep {
    fn name(&self) -> &str {
        self.manager.name()
    }

    async fn apply(&self) -> Result<()> {
        self.manager.install().await?;
        self.manager.enable().await?;
        self.manager.start().await?;

        if self.controlplane.is_ready().await && self.controlplane.is_model_ready().await {
            tracing::info!("[ControlPlaneStep] Control plane is running");
            return Ok(());
        }
        self.controlplane.setup().await
    }

    async fn verify(&self) -> Result<bool> {
        Ok(self.manager.is_running().await?
            && self.controlplane.is_controller_ready().await
            && self.controlplane.is_model_ready().await)
    }
}

/// Cluster admin identity handshake. Waits on the operator twice.
pub struct ControlPlaneUserStep {
    controlplane: Arc<ControlPlane>,
    gate: Arc<dyn ConfirmationGate>,
    operator: String,
}

impl ControlPlaneUserStep {
    pub fn new(
        controlplane: Arc<ControlPlane>,
        gate: Arc<dyn ConfirmationGate>,
        operator: String,
    ) -> Self {
        Self {
            controlplane,
            gate,
            operator,
        }
    }
}

#[async_trait]
impl PipelineStep for ControlPlaneUserStep {
    fn name(&self) -> &str {
        "controlplane-user"
    }

    fn gated(&self) -> bool {
        true
    }

    async fn apply(&self) -> Result<()> {
        self.controlplane
            .setup_user(&self.operator, self.gate.as_ref())
            .await
    }

    async fn verify(&self) -> Result<bool> {
        let user = &self.controlplane.identity().user;
        Ok(self.controlplane.user_exists(user).await)
    }
}

/// Host setup in dependency order: extra packages, snapd, hypervisor, cloud
/// tweaks, control plane, its admin user, then the artifact builder.
pub fn setup_pipeline(ctx: &SetupContext) -> SetupPipeline {
    let manager = |name: &str, target| {
        CapabilityManager::new(name, target, Arc::clone(&ctx.backend))
    };

    SetupPipeline::new(vec![
        Box::new(CapabilityStep::new(manager("extras", extras_target()))),
        Box::new(SnapdStep::new(
            manager("snapd", snapd_target(ctx.host.family)),
            ctx.host.family,
        )),
        Box::new(HypervisorStep::new(
            manager("hypervisor", hypervisor_target()),
            Arc::clone(&ctx.runner),
            ctx.operator.clone(),
        )),
        Box::new(CloudStep::new(ctx.host, Arc::clone(&ctx.runner))),
        Box::new(ControlPlaneStep::new(
            manager("controlplane", controlplane_target()),
            Arc::clone(&ctx.controlplane),
        )),
        Box::new(ControlPlaneUserStep::new(
            Arc::clone(&ctx.controlplane),
            Arc::clone(&ctx.gate),
            ctx.operator.clone(),
        )),
        Box::new(CapabilityStep::new(manager("builder", builder_target()))),
    ])
}
