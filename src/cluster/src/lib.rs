//! HPC cluster provisioning engine.
//!
//! Turns a single Linux host into a working cluster in three phases: host
//! setup through an idempotent [`pipeline::SetupPipeline`], topology capture
//! and manifest generation, then deployment through the orchestration control
//! plane. [`controller::ProvisioningController`] exposes one operation per CLI
//! command.

pub mod artifacts;
pub mod bundle;
pub mod capability;
pub mod controller;
pub mod controlplane;
pub mod error;
pub mod exec;
pub mod gate;
pub mod host;
pub mod interview;
pub mod monitor;
pub mod pipeline;
pub mod profile;
pub mod topology;

pub use controller::{ControllerDeps, InfoReport, ProvisioningController};
pub use error::{ClusterError, ErrorKind, Result};
pub use profile::{Layout, Profile, ProfileResolver};
