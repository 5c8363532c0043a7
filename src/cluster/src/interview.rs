//! The interview program collects the operator's cluster choices into a YAML file.
use crate::error::{ClusterError, Result};
use crate::exec::{CommandRunner, CommandSpec};
use crate::gate::{ConfirmationGate, InterruptPassthrough};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct Interview {
    exec: PathBuf,
    config_path: PathBuf,
    output_path: PathBuf,
    runner: Arc<dyn CommandRunner>,
}

impl Interview {
    pub fn new(
        exec: impl Into<PathBuf>,
        config_path: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            exec: exec.into(),
            config_path: config_path.into(),
            output_path: output_path.into(),
            runner,
        }
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn is_configured(&self) -> bool {
        self.config_path.exists()
    }

    /// Run the interview. Existing results are kept unless the operator asks to redo them.
    pub async fn run(&self, gate: &dyn ConfirmationGate) -> Result<()> {
        if self.output_path.exists()
            && !gate
                .ask("Existing results found. Do you want to redo the interview (y/n)?")
                .await?
        {
            tracing::info!("[Interview] Keeping results in {}", self.output_path.display());
            return Ok(());
        }

        let spec = CommandSpec::new(self.exec.to_string_lossy())
            .arg("-o")
            .arg(self.output_path.to_string_lossy())
            .arg(self.config_path.to_string_lossy());

        tracing::info!("[Interview] Running interview");
        let code = {
            let _passthrough = InterruptPassthrough::engage();
            self.runner.interactive(&spec).await?
        };
        if code != 0 {
            return Err(ClusterError::ExternalTool {
                command: spec.display_line(),
                code,
                stderr: String::new(),
            });
        }
        Ok(())
    }

    /// Raw text of the recorded results.
    pub fn show(&self) -> Result<String> {
        if !self.output_path.exists() {
            return Err(ClusterError::Config(format!(
                "failed to find interview results at {}",
                self.output_path.display()
            )));
        }
        Ok(std::fs::read_to_string(&self.output_path)?)
    }
}
