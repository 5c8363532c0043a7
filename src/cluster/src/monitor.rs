//! Detached status monitor in a terminal window.
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Env var naming the operator's preferred terminal.
pub const TERMINAL_ENV: &str = "TERMINAL";

pub const TERMINALS: &[&str] = &[
    "x-terminal-emulator",
    "/usr/bin/terminator",
    "/usr/bin/gnome-terminal",
    "konsole",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorLaunch {
    Launched { terminal: PathBuf },
    Skipped { reason: String },
}

/// First usable terminal: `preferred`, then `candidates` in order. Absolute
/// names must exist; bare names are looked up on `search_path`.
pub fn find_terminal(
    preferred: Option<&str>,
    candidates: &[&str],
    search_path: &str,
) -> Option<PathBuf> {
    preferred
        .into_iter()
        .filter(|t| !t.is_empty())
        .chain(candidates.iter().copied())
        .find_map(|name| locate(name, search_path))
}

fn locate(name: &str, search_path: &str) -> Option<PathBuf> {
    let path = Path::new(name);
    if path.is_absolute() {
        return path.exists().then(|| path.to_path_buf());
    }
    search_path
        .split(':')
        .filter(|dir| !dir.is_empty())
        .map(|dir| Path::new(dir).join(name))
        .find(|candidate| candidate.is_file())
}

/// Open `<terminal> -x <client> status --relations --watch 5s` in the background,
/// picking the terminal from `TERMINAL` and `PATH`.
pub fn launch_monitor(controlplane_exec: &Path) -> MonitorLaunch {
    let preferred = std::env::var(TERMINAL_ENV).ok();
    let search_path = std::env::var("PATH").unwrap_or_default();
    launch_monitor_in(controlplane_exec, preferred.as_deref(), TERMINALS, &search_path)
}

/// Like [`launch_monitor`] with explicit terminal choices.
/// The child runs in its own process group and is never waited on.
pub fn launch_monitor_in(
    controlplane_exec: &Path,
    preferred: Option<&str>,
    candidates: &[&str],
    search_path: &str,
) -> MonitorLaunch {
    let Some(terminal) = find_terminal(preferred, candidates, search_path) else {
        tracing::warn!("[Monitor] Cannot find terminal");
        return MonitorLaunch::Skipped {
            reason: "cannot find terminal".to_string(),
        };
    };
    tracing::info!("[Monitor] Found terminal program ({})", terminal.display());

    let spawned = Command::new(&terminal)
        .arg("-x")
        .arg(controlplane_exec)
        .args(["status", "--relations", "--watch", "5s"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .process_group(0)
        .spawn();

    match spawned {
        Ok(child) => {
            tracing::debug!("[Monitor] Started pid {}", child.id());
            MonitorLaunch::Launched { terminal }
        }
        Err(e) => {
            tracing::warn!("[Monitor] Failed to launch {}: {}", terminal.display(), e);
            MonitorLaunch::Skipped {
                reason: format!("failed to launch {}: {}", terminal.display(), e),
            }
        }
    }
}
