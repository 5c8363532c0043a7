//! Driver for the external artifact (charm) builder.
use crate::error::{ClusterError, Result};
use crate::exec::{require_success, CommandRunner, CommandSpec};
use std::path::PathBuf;
use std::sync::Arc;

pub struct ArtifactBuilder {
    exec: PathBuf,
    config_path: PathBuf,
    artifact_home: PathBuf,
    work_dir: PathBuf,
    runner: Arc<dyn CommandRunner>,
}

impl ArtifactBuilder {
    pub fn new(
        exec: impl Into<PathBuf>,
        config_path: impl Into<PathBuf>,
        artifact_home: impl Into<PathBuf>,
        work_dir: impl Into<PathBuf>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            exec: exec.into(),
            config_path: config_path.into(),
            artifact_home: artifact_home.into(),
            work_dir: work_dir.into(),
            runner,
        }
    }

    fn command(&self, subcommand: &str) -> CommandSpec {
        CommandSpec::new(self.exec.to_string_lossy())
            .arg(subcommand)
            .arg("-c")
            .arg(self.config_path.to_string_lossy())
    }

    fn with_home(&self, spec: CommandSpec) -> CommandSpec {
        spec.arg("-C").arg(self.artifact_home.to_string_lossy())
    }

    /// Every artifact the builder configuration knows about.
    pub async fn list(&self) -> Result<Vec<String>> {
        let spec = self.command("list");
        let output = self.runner.capture(&spec).await?;
        let output = require_success(&spec, output)?;
        Ok(output.stdout.split_whitespace().map(String::from).collect())
    }

    async fn list_best_effort(&self, subcommand: &str) -> Vec<String> {
        let spec = self.with_home(self.command(subcommand));
        match self.runner.capture(&spec).await {
            Ok(output) if output.success() => output
                .stdout
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(String::from)
                .collect(),
            Ok(output) => {
                tracing::debug!(
                    "[ArtifactBuilder] `{}` exited {}",
                    spec.display_line(),
                    output.exit_code
                );
                Vec::new()
            }
            Err(e) => {
                tracing::debug!("[ArtifactBuilder] `{}` failed: {}", spec.display_line(), e);
                Vec::new()
            }
        }
    }

    /// Artifacts present in the artifact home. Empty if the builder cannot answer.
    pub async fn list_built(&self) -> Vec<String> {
        self.list_best_effort("list-built").await
    }

    /// Artifacts still to be built. Empty if the builder cannot answer.
    pub async fn list_missing(&self) -> Vec<String> {
        self.list_best_effort("list-missing").await
    }

    /// `(name, ready)` for every artifact the builder reports, sorted by name.
    pub async fn status(&self) -> Vec<(String, bool)> {
        let built = self.list_built().await;
        let missing = self.list_missing().await;

        let mut status: Vec<(String, bool)> = built
            .into_iter()
            .map(|name| (name, true))
            .chain(missing.into_iter().map(|name| (name, false)))
            .collect();
        status.sort();
        status
    }

    /// Build `names`, or everything `list` reports when none are given.
    pub async fn build(&self, series: Option<&str>, names: &[String]) -> Result<()> {
        let names = if names.is_empty() {
            self.list().await?
        } else {
            names.to_vec()
        };

        let mut spec = CommandSpec::new(self.exec.to_string_lossy())
            .args(["build", "-c"])
            .arg(self.config_path.to_string_lossy())
            .arg("-w")
            .arg(self.work_dir.to_string_lossy());
        spec = self.with_home(spec);
        if let Some(series) = series {
            spec = spec.args(["-s", series]);
        }
        spec = spec.args(names.iter().cloned());

        tracing::info!("[ArtifactBuilder] Building {} artifacts", names.len());
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
