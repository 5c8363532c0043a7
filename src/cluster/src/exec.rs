//! Subprocess execution: every external tool the engine drives goes through a
//! [`CommandRunner`] so probes and mutations can be replayed against a fake in tests.
use crate::error::{ClusterError, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;

/// Directories snap places its command shims in. Prepended to the child's PATH.
pub const SNAP_BIN_DIRS: &[&str] = &["/snap/bin", "/var/lib/snapd/snap/bin"];

const BANNER_START: &str = "-------------------- ↓ ↓ ↓ ↓ ↓ --------------------";
const BANNER_END: &str = "-------------------- ↑ ↑ ↑ ↑ ↑ --------------------";

/// A command to run: program, arguments and an optional time bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Full command line, space separated. Used for logs, errors and fake matching.
    pub fn display_line(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Maps a non-zero exit into [`ClusterError::ExternalTool`].
pub fn require_success(spec: &CommandSpec, output: CommandOutput) -> Result<CommandOutput> {
    if output.success() {
        Ok(output)
    } else {
        let last_line = output.stderr.lines().last().unwrap_or("").trim().to_string();
        Err(ClusterError::tool(
            spec.display_line(),
            output.exit_code,
            last_line,
        ))
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run with captured stdout/stderr and no stdin. Honors `spec.timeout`.
    async fn capture(&self, spec: &CommandSpec) -> Result<CommandOutput>;

    /// Run attached to the operator's terminal and return the exit code.
    /// The child gets the default SIGINT disposition even when this process ignores it.
    async fn interactive(&self, spec: &CommandSpec) -> Result<i32>;
}

/// Runs commands on the host through `tokio::process`.
#[derive(Debug, Clone, Default)]
pub struct SystemRunner {
    decorate: bool,
}

impl SystemRunner {
    pub fn new() -> Self {
        Self { decorate: true }
    }

    /// Disable the banner lines printed around interactive commands.
    pub fn undecorated() -> Self {
        Self { decorate: false }
    }

    fn command(&self, spec: &CommandSpec) -> tokio::process::Command {
        let mut command = tokio::process::Command::new(&spec.program);
        command.args(&spec.args).env("PATH", child_path()).kill_on_drop(true);
        command
    }
}

fn child_path() -> String {
    let current = std::env::var("PATH").unwrap_or_default();
    let mut parts: Vec<&str> = SNAP_BIN_DIRS.to_vec();
    parts.extend(current.split(':').filter(|p| !p.is_empty()));
    parts.join(":")
}

fn spawn_error(spec: &CommandSpec, e: std::io::Error) -> ClusterError {
    ClusterError::tool(spec.display_line(), -1, format!("failed to spawn: {}", e))
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn capture(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        tracing::debug!("[SystemRunner] capture: {}", spec.display_line());

        let mut command = self.command(spec);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let output = match spec.timeout {
            Some(limit) => tokio::time::timeout(limit, command.output())
                .await
                .map_err(|_| ClusterError::Timeout {
                    command: spec.display_line(),
                    after: limit,
                })?,
            None => command.output().await,
        }
        .map_err(|e| spawn_error(spec, e))?;

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    async fn interactive(&self, spec: &CommandSpec) -> Result<i32> {
        tracing::info!("[SystemRunner] running: {}", spec.display_line());

        let mut command = self.command(spec);
        command
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        // SAFETY: only async-signal-safe work (sigaction) happens between fork and exec.
        unsafe {
            command.pre_exec(|| {
                use nix::sys::signal::{signal, SigHandler, Signal};
                signal(Signal::SIGINT, SigHandler::SigDfl)
                    .map(|_| ())
                    .map_err(std::io::Error::from)
            });
        }

        if self.decorate {
            println!("{}", BANNER_START);
        }
        let status = command.status().await;
        if self.decorate {
            println!("{}", BANNER_END);
        }

        let status = status.map_err(|e| spawn_error(spec, e))?;
        Ok(status.code().unwrap_or(-1))
    }
}
