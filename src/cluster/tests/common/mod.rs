//! Shared fakes for integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use cluster::capability::{PackageBackend, SnapSpec};
use cluster::error::Result;
use cluster::exec::{CommandOutput, CommandRunner, CommandSpec};
use cluster::profile::ControlPlaneIdentity;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub fn ok(stdout: &str) -> CommandOutput {
    CommandOutput {
        exit_code: 0,
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

pub fn fail(code: i32, stderr: &str) -> CommandOutput {
    CommandOutput {
        exit_code: code,
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

/// Command line with the program reduced to its file name, so rules can say
/// `juju status` whatever directory the fake binary lives in.
pub fn normalized(spec: &CommandSpec) -> String {
    let program = Path::new(&spec.program)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| spec.program.clone());
    std::iter::once(program)
        .chain(spec.args.iter().cloned())
        .collect::<Vec<_>>()
        .join(" ")
}

struct InteractiveRule {
    prefix: String,
    code: i32,
    unlocks: Vec<(String, CommandOutput)>,
}

/// Scripted [`CommandRunner`]. Capture rules match on normalized command-line
/// prefixes, most recently added first. Unmatched captures exit 1 and
/// unmatched interactive commands exit 0.
#[derive(Default)]
pub struct FakeRunner {
    capture_rules: Mutex<Vec<(String, CommandOutput)>>,
    interactive_rules: Mutex<Vec<InteractiveRule>>,
    calls: Mutex<Vec<String>>,
    interactive_calls: Mutex<Vec<String>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_capture(&self, prefix: &str, output: CommandOutput) -> &Self {
        self.capture_rules
            .lock()
            .unwrap()
            .push((prefix.to_string(), output));
        self
    }

    pub fn on_interactive(&self, prefix: &str, code: i32) -> &Self {
        self.interactive_rules.lock().unwrap().push(InteractiveRule {
            prefix: prefix.to_string(),
            code,
            unlocks: Vec::new(),
        });
        self
    }

    /// Once an interactive command matching `prefix` succeeds, captures
    /// matching `capture_prefix` answer `output`.
    pub fn unlock_after(&self, prefix: &str, capture_prefix: &str, output: CommandOutput) -> &Self {
        let mut rules = self.interactive_rules.lock().unwrap();
        match rules.iter_mut().rev().find(|r| r.prefix == prefix) {
            Some(rule) => rule.unlocks.push((capture_prefix.to_string(), output)),
            None => rules.push(InteractiveRule {
                prefix: prefix.to_string(),
                code: 0,
                unlocks: vec![(capture_prefix.to_string(), output)],
            }),
        }
        self
    }

    /// Every command line run, captured or interactive, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn interactive_calls(&self) -> Vec<String> {
        self.interactive_calls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.calls().iter().position(|c| c.starts_with(prefix))
    }

    pub fn positions(&self, prefix: &str) -> Vec<usize> {
        self.calls()
            .iter()
            .enumerate()
            .filter(|(_, c)| c.starts_with(prefix))
            .map(|(i, _)| i)
            .collect()
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn capture(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let line = normalized(spec);
        self.calls.lock().unwrap().push(line.clone());
        let rules = self.capture_rules.lock().unwrap();
        Ok(rules
            .iter()
            .rev()
            .find(|(prefix, _)| line.starts_with(prefix.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or_else(|| fail(1, "no rule")))
    }

    async fn interactive(&self, spec: &CommandSpec) -> Result<i32> {
        let line = normalized(spec);
        self.calls.lock().unwrap().push(line.clone());
        self.interactive_calls.lock().unwrap().push(line.clone());

        let (code, unlocks) = {
            let rules = self.interactive_rules.lock().unwrap();
            match rules.iter().rev().find(|r| line.starts_with(r.prefix.as_str())) {
                Some(rule) => (rule.code, rule.unlocks.clone()),
                None => (0, Vec::new()),
            }
        };
        if code == 0 {
            self.capture_rules.lock().unwrap().extend(unlocks);
        }
        Ok(code)
    }
}

/// In-memory [`PackageBackend`] counting every mutating call.
#[derive(Default)]
pub struct FakeBackend {
    packages: Mutex<HashSet<String>>,
    snaps: Mutex<HashSet<String>>,
    enabled: Mutex<HashSet<String>>,
    running: Mutex<HashSet<String>>,
    mutations: Mutex<Vec<String>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend where everything in the listed names is already installed, enabled and running.
    pub fn satisfied(packages: &[&str], snaps: &[&str], services: &[&str]) -> Self {
        let backend = Self::default();
        backend.packages.lock().unwrap().extend(packages.iter().map(|s| s.to_string()));
        backend.snaps.lock().unwrap().extend(snaps.iter().map(|s| s.to_string()));
        backend.enabled.lock().unwrap().extend(services.iter().map(|s| s.to_string()));
        backend.running.lock().unwrap().extend(services.iter().map(|s| s.to_string()));
        backend
    }

    pub fn mutations(&self) -> Vec<String> {
        self.mutations.lock().unwrap().clone()
    }

    fn record(&self, what: String) {
        self.mutations.lock().unwrap().push(what);
    }
}

#[async_trait]
impl PackageBackend for FakeBackend {
    async fn is_package_installed(&self, name: &str) -> Result<bool> {
        Ok(self.packages.lock().unwrap().contains(name))
    }

    async fn install_packages(&self, names: &[String]) -> Result<()> {
        self.record(format!("install-packages {}", names.join(" ")));
        self.packages.lock().unwrap().extend(names.iter().cloned());
        Ok(())
    }

    async fn is_snap_installed(&self, name: &str) -> Result<bool> {
        Ok(self.snaps.lock().unwrap().contains(name))
    }

    async fn install_snap(&self, snap: &SnapSpec) -> Result<()> {
        self.record(format!("install-snap {}", snap.name));
        self.snaps.lock().unwrap().insert(snap.name.clone());
        Ok(())
    }

    async fn is_service_enabled(&self, name: &str) -> Result<bool> {
        Ok(self.enabled.lock().unwrap().contains(name))
    }

    async fn enable_service(&self, name: &str) -> Result<()> {
        self.record(format!("enable {}", name));
        self.enabled.lock().unwrap().insert(name.to_string());
        Ok(())
    }

    async fn is_service_running(&self, name: &str) -> Result<bool> {
        Ok(self.running.lock().unwrap().contains(name))
    }

    async fn start_service(&self, name: &str) -> Result<()> {
        self.record(format!("start {}", name));
        self.running.lock().unwrap().insert(name.to_string());
        Ok(())
    }
}

pub fn identity() -> ControlPlaneIdentity {
    ControlPlaneIdentity {
        cloud: "localhost".to_string(),
        controller: "hpct-controller".to_string(),
        model: "hpct".to_string(),
        user: "hpct-admin".to_string(),
    }
}

/// An executable-looking file standing in for a client binary.
pub fn fake_binary(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
    path
}

pub const PROFILE_YAML: &str = "\
controlplane:
  cloud: localhost
  controller: hpct-controller
  model: hpct
  user: hpct-admin
hypervisor:
  user: operator
artifacts:
  home: charms
  builderConfigPath: charms-builder/charms-builder.yaml
  bundleName: bundle.yaml
interview:
  path: interview/interview.yaml
";

/// Lay out `<top>/work/<name>/main.yaml` with `content`.
pub fn write_working_profile(top: &Path, name: &str, content: &str) -> PathBuf {
    let dir = top.join("work").join(name);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("main.yaml"), content).unwrap();
    dir
}
