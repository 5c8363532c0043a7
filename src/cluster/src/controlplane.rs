//! Front-end to the orchestration client (Juju-style CLI).
//!
//! Nothing about the control plane's state is cached: every decision re-probes
//! the external tool, because the controller, model or users may change
//! between calls. Probes are read-only, time-bounded and report "not ready"
//! instead of failing when the client binary is missing or unresponsive.

use crate::error::{ClusterError, Result};
use crate::exec::{require_success, CommandOutput, CommandRunner, CommandSpec};
use crate::gate::ConfirmationGate;
use crate::profile::ControlPlaneIdentity;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Upper bound for any read-only probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Rights granted to the cluster admin user on the model.
pub const ADMIN_RIGHTS: &str = "admin";

/// Lifecycle position of the control plane, derived from probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ControlPlaneState {
    /// Client binary not installed.
    Absent,
    /// Installed, no controller for this cloud/controller pair.
    InstalledUnbootstrapped,
    /// Controller exists, target model does not answer.
    Bootstrapped,
    /// Target model answers a status query.
    ModelReady,
    /// Cluster admin identity exists.
    UserReady,
}

impl std::fmt::Display for ControlPlaneState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ControlPlaneState::Absent => "absent",
            ControlPlaneState::InstalledUnbootstrapped => "installed (not bootstrapped)",
            ControlPlaneState::Bootstrapped => "bootstrapped",
            ControlPlaneState::ModelReady => "model ready",
            ControlPlaneState::UserReady => "user ready",
        };
        f.write_str(s)
    }
}

pub struct ControlPlane {
    identity: ControlPlaneIdentity,
    exec: PathBuf,
    runner: Arc<dyn CommandRunner>,
    probe_timeout: Duration,
}

impl ControlPlane {
    pub fn new(
        identity: ControlPlaneIdentity,
        exec: impl Into<PathBuf>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            identity,
            exec: exec.into(),
            runner,
            probe_timeout: PROBE_TIMEOUT,
        }
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn identity(&self) -> &ControlPlaneIdentity {
        &self.identity
    }

    pub fn exec(&self) -> &Path {
        &self.exec
    }

    fn command(&self, args: &[&str]) -> CommandSpec {
        CommandSpec::new(self.exec.to_string_lossy()).args(args.iter().copied())
    }

    /// Command name shown to the operator in instructions.
    fn client_name(&self) -> String {
        self.exec
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "juju".to_string())
    }

    /// Time-bounded read-only query. `None` covers a missing binary, a timeout
    /// or a spawn failure alike.
    async fn probe(&self, args: &[&str]) -> Option<CommandOutput> {
        if !self.is_installed() {
            return None;
        }
        let spec = self.command(args).with_timeout(self.probe_timeout);
        match self.runner.capture(&spec).await {
            Ok(output) => Some(output),
            Err(e) => {
                tracing::debug!("[ControlPlane] Probe `{}` failed: {}", spec.display_line(), e);
                None
            }
        }
    }

    async fn probe_json(&self, args: &[&str]) -> Option<Value> {
        let output = self.probe(args).await?;
        if !output.success() {
            return None;
        }
        serde_json::from_str(&output.stdout).ok()
    }

    async fn run_interactive(&self, args: &[&str]) -> Result<()> {
        let spec = self.command(args);
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

    // -- probes --

    pub fn is_installed(&self) -> bool {
        self.exec.exists()
    }

    pub async fn is_ready(&self) -> bool {
        self.probe(&["status"]).await.is_some_and(|o| o.success())
    }

    pub async fn is_controller_ready(&self) -> bool {
        let Some(listing) = self.probe_json(&["controllers", "--format", "json"]).await else {
            return false;
        };
        listing
            .get("controllers")
            .and_then(|c| c.get(&self.identity.controller))
            .is_some_and(|c| !c.is_null())
    }

    pub async fn is_model_ready(&self) -> bool {
        let model = self.identity.qualified_model();
        self.probe(&["status", "-m", &model])
            .await
            .is_some_and(|o| o.success())
    }

    pub async fn is_user_ready(&self, user: &str) -> bool {
        self.probe_json(&["users", "--format", "json"])
            .await
            .and_then(|v| v.as_array().cloned())
            .is_some_and(|users| {
                users
                    .iter()
                    .any(|u| u.get("user-name").and_then(Value::as_str) == Some(user))
            })
    }

    pub async fn user_exists(&self, user: &str) -> bool {
        self.probe(&["show-user", user])
            .await
            .is_some_and(|o| o.success())
    }

    /// Identity the client is currently logged in as.
    pub async fn whoami(&self) -> Option<String> {
        let output = self.probe(&["whoami", "--format", "json"]).await?;
        if !output.success() || !output.stderr.trim().is_empty() {
            return None;
        }
        let value: Value = serde_json::from_str(&output.stdout).ok()?;
        value
            .get("user")
            .and_then(Value::as_str)
            .map(String::from)
    }

    pub async fn state(&self) -> ControlPlaneState {
        if !self.is_installed() {
            ControlPlaneState::Absent
        } else if !self.is_controller_ready().await {
            ControlPlaneState::InstalledUnbootstrapped
        } else if !self.is_model_ready().await {
            ControlPlaneState::Bootstrapped
        } else if !self.is_user_ready(&self.identity.user).await {
            ControlPlaneState::ModelReady
        } else {
            ControlPlaneState::UserReady
        }
    }

    // -- mutations --

    /// Bootstrap the controller unless the probe already finds it.
    pub async fn bootstrap(&self) -> Result<()> {
        tracing::info!(
            "[ControlPlane] Bootstrapping controller cloud ({}) controller ({})",
            self.identity.cloud,
            self.identity.controller
        );
        if self.is_controller_ready().await {
            tracing::info!("[ControlPlane] Controller exists");
            return Ok(());
        }
        self.run_interactive(&["bootstrap", &self.identity.cloud, &self.identity.controller])
            .await
    }

    pub async fn add_model(&self) -> Result<()> {
        tracing::info!("[ControlPlane] Adding model ({})", self.identity.model);
        self.run_interactive(&["add-model", &self.identity.model]).await
    }

    pub async fn add_user(&self, user: &str) -> Result<()> {
        tracing::info!("[ControlPlane] Adding user ({})", user);
        self.run_interactive(&["add-user", user]).await
    }

    /// Grant `rights` on `model`. Re-granting rights the user already holds is a no-op.
    pub async fn grant(&self, user: &str, rights: &str, model: &str) -> Result<()> {
        let spec = self.command(&["grant", user, rights, model]);
        let output = self.runner.capture(&spec).await?;
        if !output.success() && output.stderr.contains("already has") {
            tracing::info!("[ControlPlane] User {} already has {} on {}", user, rights, model);
            return Ok(());
        }
        require_success(&spec, output).map(|_| ())
    }

    pub async fn login(&self, user: &str) -> Result<()> {
        self.run_interactive(&["login", "-u", user]).await
    }

    pub async fn logout(&self) -> Result<()> {
        self.run_interactive(&["logout"]).await
    }

    /// Switch the client to `user` unless it is already logged in as them.
    pub async fn ensure_logged_in(&self, user: &str) -> Result<()> {
        if self.whoami().await.as_deref() == Some(user) {
            return Ok(());
        }
        tracing::info!("[ControlPlane] Logging in as user ({})", user);
        if let Err(e) = self.logout().await {
            tracing::debug!("[ControlPlane] Logout before login failed: {}", e);
        }
        self.login(user).await
    }

    pub async fn deploy(&self, bundle: &Path) -> Result<()> {
        let model = self.identity.qualified_model();
        let bundle = bundle.to_string_lossy();
        tracing::info!("[ControlPlane] Deploying {} to {}", bundle, model);
        self.run_interactive(&["deploy", &bundle, "-m", &model]).await
    }

    pub async fn remove_application(&self, name: &str, force: bool) -> Result<()> {
        let model = self.identity.qualified_model();
        let mut args = vec!["remove-application", "-m", model.as_str(), "--no-prompt", name];
        if force {
            args.push("--force");
        }
        let spec = self.command(&args);
        let output = self.runner.capture(&spec).await?;
        require_success(&spec, output).map(|_| ())
    }

    /// Remove every application, continuing past failures, then report them together.
    pub async fn remove_applications(&self, names: &[&str], force: bool) -> Result<()> {
        let mut failed = Vec::new();
        for name in names {
            match self.remove_application(name, force).await {
                Ok(()) => tracing::info!("[ControlPlane] Removed application {}", name),
                Err(e) => {
                    tracing::warn!("[ControlPlane] Failed to remove {}: {}", name, e);
                    failed.push(*name);
                }
            }
        }
        if failed.is_empty() {
            Ok(())
        } else {
            Err(ClusterError::tool(
                "remove-application",
                1,
                format!("failed to remove: {}", failed.join(" ")),
            ))
        }
    }

    /// Bring the control plane to `ModelReady`: bootstrap and add the model only
    /// when their probes fail, re-probing after each action.
    pub async fn setup(&self) -> Result<()> {
        tracing::info!("[ControlPlane] Checking for controller");
        if !self.is_controller_ready().await {
            self.bootstrap().await?;
            if !self.is_controller_ready().await {
                return Err(ClusterError::NotReady(format!(
                    "controller {} not available after bootstrap",
                    self.identity.controller
                )));
            }
        }

        tracing::info!("[ControlPlane] Checking model");
        if !self.is_model_ready().await {
            self.add_model().await?;
            if !self.is_model_ready().await {
                return Err(ClusterError::NotReady(format!(
                    "model {} not available after add-model",
                    self.identity.model
                )));
            }
            tracing::info!("[ControlPlane] Model ({}) added", self.identity.model);
        }
        Ok(())
    }

    /// Two-phase identity handshake with the operator.
    ///
    /// Phase 1 creates the user if missing and waits for the operator to
    /// register it in their own session. Phase 2 grants rights and waits for
    /// them to switch to the model. The user must pass the readiness probe afterwards.
    pub async fn setup_user(&self, operator: &str, gate: &dyn ConfirmationGate) -> Result<()> {
        let user = self.identity.user.clone();
        let client = self.client_name();

        if self.user_exists(&user).await {
            tracing::info!("[ControlPlane] User ({}) already set up", user);
        } else {
            self.add_user(&user).await?;
            println!(
                "\n\x1b[5m>>> User \"{}\", run the \"{} register\" command above.\x1b[0m",
                operator, client
            );
            gate.confirm("Press ENTER once the user has registered.").await?;
        }

        tracing::info!("[ControlPlane] Granting rights");
        self.grant(&user, ADMIN_RIGHTS, &self.identity.model).await?;

        println!(
            "The {} user should run \"{} switch {}\".\n\n\x1b[5m>>> User \"{}\", run the \"{} switch\" command above.\x1b[0m",
            user,
            client,
            self.identity.qualified_model(),
            operator,
            client
        );
        gate.confirm("Press ENTER once the user has switched.").await?;

        if !self.is_user_ready(&user).await {
            return Err(ClusterError::NotReady(format!(
                "user {} not visible to the control plane",
                user
            )));
        }
        Ok(())
    }
}
