//! Error types for provisioning operations.
use std::time::Duration;
use thiserror::Error;

/// Coarse classification of a [`ClusterError`], stable across message changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    ExternalTool,
    NotReady,
    UserAbort,
    Timeout,
    NotPermitted,
    Io,
}

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Command `{command}` failed (exit {code}): {stderr}")]
    ExternalTool {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("Not ready: {0}")]
    NotReady(String),

    #[error("Aborted by user: {0}")]
    UserAbort(String),

    #[error("Command `{command}` timed out after {after:?}")]
    Timeout { command: String, after: Duration },

    #[error("Not permitted: {0}")]
    NotPermitted(String),

    #[error("Step '{step}' failed: {source}")]
    Step {
        step: String,
        #[source]
        source: Box<ClusterError>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClusterError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClusterError::Config(_) => ErrorKind::Config,
            ClusterError::ExternalTool { .. } => ErrorKind::ExternalTool,
            ClusterError::NotReady(_) => ErrorKind::NotReady,
            ClusterError::UserAbort(_) => ErrorKind::UserAbort,
            ClusterError::Timeout { .. } => ErrorKind::Timeout,
            ClusterError::NotPermitted(_) => ErrorKind::NotPermitted,
            ClusterError::Step { source, .. } => source.kind(),
            ClusterError::Io(_) => ErrorKind::Io,
        }
    }

    /// Name of the pipeline step this error was raised from, if any.
    pub fn failed_step(&self) -> Option<&str> {
        match self {
            ClusterError::Step { step, .. } => Some(step),
            _ => None,
        }
    }

    pub(crate) fn tool(command: impl Into<String>, code: i32, stderr: impl Into<String>) -> Self {
        ClusterError::ExternalTool {
            command: command.into(),
            code,
            stderr: stderr.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ClusterError>;
