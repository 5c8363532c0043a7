//! Setup pipeline executor.
//!
//! Runs an ordered list of idempotent steps: each step acts, then its
//! postcondition is re-probed. Fail-fast: the first step that errors or whose
//! postcondition does not hold stops the run and later steps are never touched.
//! There is no checkpoint; re-running is safe because every step re-checks
//! its own state before acting.
mod steps;

pub use steps::{
    setup_pipeline, CapabilityStep, CloudStep, ControlPlaneStep, ControlPlaneUserStep,
    HypervisorStep, SetupContext, SnapdStep, HYPERVISOR_GROUP, SNAPD_SNAP_DIR,
};

use crate::error::{ClusterError, Result};
use crate::gate::InterruptPassthrough;
use async_trait::async_trait;

#[async_trait]
pub trait PipelineStep: Send + Sync {
    fn name(&self) -> &str;

    /// Steps that wait for the operator. Their SIGINT goes to the interactive child.
    fn gated(&self) -> bool {
        false
    }

    /// Idempotent effectful action.
    async fn apply(&self) -> Result<()>;

    /// Postcondition probe, checked after `apply`.
    async fn verify(&self) -> Result<bool>;
}

/// Names of the steps that completed, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReport {
    pub completed: Vec<String>,
}

pub struct SetupPipeline {
    steps: Vec<Box<dyn PipelineStep>>,
}

impl SetupPipeline {
    pub fn new(steps: Vec<Box<dyn PipelineStep>>) -> Self {
        Self { steps }
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    pub async fn run(&self) -> Result<PipelineReport> {
        let total = self.steps.len();
        let mut report = PipelineReport::default();

        for (index, step) in self.steps.iter().enumerate() {
            tracing::info!(
                "[SetupPipeline] ({}/{}) Setting up {}",
                index + 1,
                total,
                step.name()
            );
            let started = std::time::Instant::now();
            run_step(step.as_ref()).await?;
            tracing::info!(
                "[SetupPipeline] {} setup complete ({}ms)",
                step.name(),
                started.elapsed().as_millis()
            );
            report.completed.push(step.name().to_string());
        }

        tracing::info!("[SetupPipeline] Setup completed successfully");
        Ok(report)
    }

    /// Run a single named step on its own.
    pub async fn run_only(&self, name: &str) -> Result<PipelineReport> {
        let step = self
            .steps
            .iter()
            .find(|s| s.name() == name)
            .ok_or_else(|| {
                ClusterError::Config(format!(
                    "unknown setup step '{}' (known: {})",
                    name,
                    self.step_names().join(", ")
                ))
            })?;
        run_step(step.as_ref()).await?;
        Ok(PipelineReport {
            completed: vec![step.name().to_string()],
        })
    }
}

async fn run_step(step: &dyn PipelineStep) -> Result<()> {
    let _passthrough = step.gated().then(InterruptPassthrough::engage);

    let outcome = match step.apply().await {
        Ok(()) => match step.verify().await {
            Ok(true) => Ok(()),
            Ok(false) => Err(ClusterError::NotReady(format!(
                "{} postcondition not met",
                step.name()
            ))),
            Err(e) => Err(e),
        },
        Err(e) => Err(e),
    };

    outcome.map_err(|source| {
        tracing::error!("[SetupPipeline] {} setup failed: {}", step.name(), source);
        ClusterError::Step {
            step: step.name().to_string(),
            source: Box::new(source),
        }
    })
}
