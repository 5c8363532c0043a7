//! Top-level provisioning operations, one per CLI command.
//!
//! Run at most one provisioning session per profile at a time. Nothing here
//! locks the profile's working directory: two concurrent sessions would race on
//! the interview results, the manifest and the control plane.

use crate::artifacts::ArtifactBuilder;
use crate::bundle::{BundleGenerator, GeneratedBundle, APP_NAMES};
use crate::capability::{
    builder_target, extras_target, hypervisor_target, snapd_target, CapabilityManager,
    CapabilityTarget, PackageBackend, SystemBackend,
};
use crate::controlplane::ControlPlane;
use crate::error::{ClusterError, Result};
use crate::exec::{CommandRunner, SystemRunner};
use crate::gate::{ConfirmationGate, StdinGate};
use crate::host::{self, user_in_group, HostInfo};
use crate::interview::Interview;
use crate::monitor::{launch_monitor, launch_monitor_in, MonitorLaunch};
use crate::pipeline::{setup_pipeline, PipelineReport, SetupContext, HYPERVISOR_GROUP};
use crate::profile::{Layout, Profile, ProfileResolver};
use crate::topology::load_topology;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// One `key: value` line of the info report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoLine {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoSection {
    pub title: String,
    pub lines: Vec<InfoLine>,
}

impl InfoSection {
    fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            lines: Vec::new(),
        }
    }

    fn line(&mut self, key: impl Into<String>, value: impl ToString) -> &mut Self {
        self.lines.push(InfoLine {
            key: key.into(),
            value: value.to_string(),
        });
        self
    }
}

/// Best-effort status report. Probe failures show up as values, never as errors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InfoReport {
    pub sections: Vec<InfoSection>,
}

impl InfoReport {
    pub fn section(&self, title: &str) -> Option<&InfoSection> {
        self.sections.iter().find(|s| s.title == title)
    }

    pub fn value(&self, title: &str, key: &str) -> Option<&str> {
        self.section(title)?
            .lines
            .iter()
            .find(|l| l.key == key)
            .map(|l| l.value.as_str())
    }
}

impl fmt::Display for InfoReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, section) in self.sections.iter().enumerate() {
            if index > 0 {
                writeln!(f)?;
            }
            writeln!(f, "{}:", section.title)?;
            for line in &section.lines {
                writeln!(f, "{}: {}", line.key, line.value)?;
            }
        }
        Ok(())
    }
}

fn probe_value(result: Result<bool>) -> String {
    match result {
        Ok(value) => value.to_string(),
        Err(e) => format!("unknown ({})", e),
    }
}

/// Host-facing collaborators. [`ControllerDeps::system`] wires the real ones.
pub struct ControllerDeps {
    pub host: HostInfo,
    pub runner: Arc<dyn CommandRunner>,
    pub backend: Arc<dyn PackageBackend>,
    pub gate: Arc<dyn ConfirmationGate>,
    /// Login name of the invoking user.
    pub login: String,
    pub is_root: bool,
}

impl ControllerDeps {
    pub fn system() -> Self {
        let host = HostInfo::detect();
        let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner::new());
        Self {
            host,
            backend: Arc::new(SystemBackend::new(host.family, Arc::clone(&runner))),
            runner,
            gate: Arc::new(StdinGate),
            login: host::login_name().unwrap_or_default(),
            is_root: host::is_root(),
        }
    }
}

pub struct ProvisioningController {
    layout: Layout,
    profile: Profile,
    deps: ControllerDeps,
    controlplane: Arc<ControlPlane>,
}

impl ProvisioningController {
    pub fn new(layout: Layout, profile: Profile, deps: ControllerDeps) -> Self {
        let controlplane = Arc::new(ControlPlane::new(
            profile.identity.clone(),
            profile.controlplane_exec.clone(),
            Arc::clone(&deps.runner),
        ));
        Self {
            layout,
            profile,
            deps,
            controlplane,
        }
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn controlplane(&self) -> &ControlPlane {
        &self.controlplane
    }

    fn manager(&self, name: &str, target: CapabilityTarget) -> CapabilityManager {
        CapabilityManager::new(name, target, Arc::clone(&self.deps.backend))
    }

    fn artifact_builder(&self) -> ArtifactBuilder {
        ArtifactBuilder::new(
            self.profile.builder_exec.clone(),
            self.profile.builder_config_path.clone(),
            self.profile.artifact_home.clone(),
            self.profile.work_dir.clone(),
            Arc::clone(&self.deps.runner),
        )
    }

    fn interview_program(&self) -> Interview {
        Interview::new(
            self.profile.interview_exec.clone(),
            self.profile.interview_config_path.clone(),
            self.profile.interview_output_path.clone(),
            Arc::clone(&self.deps.runner),
        )
    }

    fn require_root(&self) -> Result<()> {
        if self.deps.is_root {
            Ok(())
        } else {
            Err(ClusterError::NotPermitted(
                "run as root in another window".to_string(),
            ))
        }
    }

    /// Status of every component. Never fails.
    pub async fn check(&self) -> InfoReport {
        let profile = &self.profile;
        let mut report = InfoReport::default();

        let mut general = InfoSection::new("GENERAL");
        general
            .line("profile", &profile.name)
            .line("user", &self.deps.login)
            .line("top dir", self.layout.top_dir.display())
            .line("etc dir", self.layout.etc_dir.display())
            .line("artifact home", profile.artifact_home.display())
            .line("work dir", self.layout.work_dir.display())
            .line("work profile dir", profile.work_dir.display());
        report.sections.push(general);

        let (source, working) = ProfileResolver::new(self.layout.clone()).list_profiles();
        let mut profiles = InfoSection::new("PROFILES");
        profiles
            .line("source", source.join(" "))
            .line("working", working.join(" "));
        report.sections.push(profiles);

        let snapd = self.manager("snapd", snapd_target(self.deps.host.family));
        let mut section = InfoSection::new("SNAPD");
        section.line("snapd installed", probe_value(snapd.is_installed().await));
        report.sections.push(section);

        let builder = self.manager("builder", builder_target());
        let mut section = InfoSection::new("BUILDER");
        section.line("builder installed", probe_value(builder.is_installed().await));
        report.sections.push(section);

        let hypervisor = self.manager("hypervisor", hypervisor_target());
        let in_group = user_in_group(
            self.deps.runner.as_ref(),
            &profile.hypervisor_user,
            HYPERVISOR_GROUP,
        )
        .await;
        let mut section = InfoSection::new("HYPERVISOR");
        section
            .line("hypervisor installed", probe_value(hypervisor.is_installed().await))
            .line("hypervisor user", &profile.hypervisor_user)
            .line(
                format!("user in {} group", HYPERVISOR_GROUP),
                probe_value(in_group),
            );
        report.sections.push(section);

        let extras = self.manager("extras", extras_target());
        let snaps: Vec<&str> = extras.target().snaps.iter().map(|s| s.name.as_str()).collect();
        let mut section = InfoSection::new("OTHER PACKAGES");
        section
            .line("native packages", extras.target().packages.join(" "))
            .line("snap packages", snaps.join(" "))
            .line("packages installed", probe_value(extras.is_installed().await));
        report.sections.push(section);

        let interview = self.interview_program();
        let mut section = InfoSection::new("INTERVIEW");
        section
            .line("interview installed", interview.is_configured())
            .line("results present", interview.output_path().exists());
        report.sections.push(section);

        let mut section = InfoSection::new("BUNDLE");
        section
            .line("bundle path", profile.bundle_path.display())
            .line("bundle installed", profile.bundle_path.exists());
        report.sections.push(section);

        let mut section = InfoSection::new("ARTIFACTS");
        for (name, ready) in self.artifact_builder().status().await {
            section.line(name, if ready { "ready" } else { "missing" });
        }
        report.sections.push(section);

        report.sections.push(self.controlplane_section().await);
        report
    }

    /// Alias of [`check`](Self::check).
    pub async fn info(&self) -> InfoReport {
        self.check().await
    }

    async fn controlplane_section(&self) -> InfoSection {
        let identity = self.controlplane.identity();
        let installed = self.controlplane.is_installed();

        if installed && !self.deps.is_root {
            if let Err(e) = self.controlplane.ensure_logged_in(&identity.user).await {
                tracing::warn!("[Controller] Login as {} failed: {}", identity.user, e);
            }
        }

        let mut section = InfoSection::new("CONTROL PLANE");
        section
            .line("user", &identity.user)
            .line("cloud", &identity.cloud)
            .line("controller", &identity.controller)
            .line("model", &identity.model)
            .line("installed", installed);

        if installed {
            let bootstrapped = self.controlplane.is_ready().await;
            section.line("bootstrapped", bootstrapped);
            if bootstrapped {
                section
                    .line(
                        "user ready",
                        self.controlplane.is_user_ready(&identity.user).await,
                    )
                    .line("controller ready", self.controlplane.is_controller_ready().await)
                    .line("model ready", self.controlplane.is_model_ready().await);
            }
            section.line("state", self.controlplane.state().await);
        }
        section
    }

    fn setup_context(&self) -> SetupContext {
        SetupContext {
            host: self.deps.host,
            runner: Arc::clone(&self.deps.runner),
            backend: Arc::clone(&self.deps.backend),
            controlplane: Arc::clone(&self.controlplane),
            gate: Arc::clone(&self.deps.gate),
            operator: self.profile.hypervisor_user.clone(),
        }
    }

    /// Full host setup. Root only.
    pub async fn setup(&self) -> Result<PipelineReport> {
        self.require_root()?;
        setup_pipeline(&self.setup_context()).run().await
    }

    /// One named setup step. Root only.
    pub async fn setup_step(&self, name: &str) -> Result<PipelineReport> {
        self.require_root()?;
        setup_pipeline(&self.setup_context()).run_only(name).await
    }

    /// Run the interview, then regenerate the manifest from its results.
    pub async fn interview(&self) -> Result<GeneratedBundle> {
        self.interview_program().run(self.deps.gate.as_ref()).await?;
        self.generate()
    }

    /// Regenerate the manifest. The old one is removed before the results are read.
    pub fn generate(&self) -> Result<GeneratedBundle> {
        let generator = BundleGenerator::new(self.profile.bundle_path.clone());
        generator.clear()?;
        let topology = load_topology(
            &self.profile.interview_output_path,
            self.profile.artifact_home.clone(),
            self.profile.run_on.clone(),
        )?;
        generator.generate(&topology)
    }

    pub async fn build(&self, series: Option<&str>, names: &[String]) -> Result<()> {
        self.artifact_builder().build(series, names).await
    }

    pub async fn deploy(&self) -> Result<()> {
        let bundle = &self.profile.bundle_path;
        if !bundle.exists() {
            return Err(ClusterError::Config(format!(
                "no manifest at {}, run generate first",
                bundle.display()
            )));
        }
        self.controlplane
            .ensure_logged_in(&self.profile.identity.user)
            .await?;
        self.controlplane.deploy(bundle).await
    }

    /// Remove every manifest application from the model.
    pub async fn cleanup(&self) -> Result<()> {
        self.controlplane.remove_applications(APP_NAMES, false).await
    }

    /// Log in as the cluster user, then open the status monitor. Never fails.
    pub async fn monitor(&self) -> MonitorLaunch {
        self.monitor_login().await;
        launch_monitor(self.controlplane.exec())
    }

    /// [`monitor`](Self::monitor) with explicit terminal choices.
    pub async fn monitor_in(
        &self,
        preferred: Option<&str>,
        candidates: &[&str],
        search_path: &str,
    ) -> MonitorLaunch {
        self.monitor_login().await;
        launch_monitor_in(self.controlplane.exec(), preferred, candidates, search_path)
    }

    async fn monitor_login(&self) {
        let user = &self.profile.identity.user;
        if let Err(e) = self.controlplane.ensure_logged_in(user).await {
            tracing::warn!("[Controller] Login as {} before monitor failed: {}", user, e);
        }
    }

    /// Check, interview (which regenerates the manifest), then build everything.
    pub async fn prepare(&self) -> Result<GeneratedBundle> {
        println!("{}", self.check().await);
        let generated = self.interview().await?;
        self.build(None, &[]).await?;
        Ok(generated)
    }

    pub fn show_interview_results(&self) -> Result<String> {
        self.interview_program().show()
    }
}

/// Create working profile `dst` (default: `src`) from a source profile. Must
/// not run as root: the invoking user becomes the profile's hypervisor user.
pub fn init_profile(
    layout: &Layout,
    src: &str,
    dst: Option<&str>,
    login: Option<&str>,
    is_root: bool,
) -> Result<PathBuf> {
    if is_root {
        return Err(ClusterError::NotPermitted(
            "do not run init as root".to_string(),
        ));
    }
    let login = login
        .filter(|l| !l.is_empty())
        .ok_or_else(|| ClusterError::Config("cannot determine login name".to_string()))?;

    ProfileResolver::new(layout.clone()).init_profile(src, dst.unwrap_or(src), login)
}
