//! Profile loading and path resolution.
//!
//! A profile is one cluster instance's configuration, kept as `main.yaml`
//! inside its working directory (`<top>/work/<name>/`). Source profiles that
//! `init` copies from live under `<top>/etc/hpc-cluster/profiles/`.

use crate::error::{ClusterError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const PROFILE_FILE: &str = "main.yaml";

pub const DEFAULT_CONTROLPLANE_EXEC: &str = "/snap/bin/juju";
pub const DEFAULT_RUN_ON: &str = "ubuntu-22.04-amd64";
pub const DEFAULT_INTERVIEW_OUTPUT: &str = "interview-out.yaml";

/// Env var overriding the installation top directory.
pub const HOME_ENV: &str = "HPC_CLUSTER_HOME";

/// Resolve a non-`/`-prefixed path against `base`.
pub fn resolve_path(path: &str, base: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("{}/{}", base, path)
    }
}

fn resolve_against(path: &str, base: &Path) -> PathBuf {
    PathBuf::from(resolve_path(path, &base.to_string_lossy()))
}

/// Installation directories, threaded explicitly to everything that resolves paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub top_dir: PathBuf,
    pub etc_dir: PathBuf,
    pub vendor_dir: PathBuf,
    pub work_dir: PathBuf,
}

impl Layout {
    pub fn from_top(top_dir: impl Into<PathBuf>) -> Self {
        let top_dir = top_dir.into();
        Self {
            etc_dir: top_dir.join("etc/hpc-cluster"),
            vendor_dir: top_dir.join("vendor"),
            work_dir: top_dir.join("work"),
            top_dir,
        }
    }

    /// Pick the top directory: explicit value, then `HPC_CLUSTER_HOME`, then the
    /// parent of the directory holding the running binary.
    pub fn discover(explicit: Option<PathBuf>) -> Result<Self> {
        if let Some(top) = explicit {
            return Ok(Self::from_top(top));
        }
        if let Ok(home) = std::env::var(HOME_ENV) {
            if !home.is_empty() {
                return Ok(Self::from_top(home));
            }
        }
        let exe = std::env::current_exe()?;
        let top = exe
            .parent()
            .and_then(Path::parent)
            .ok_or_else(|| {
                ClusterError::Config(format!("cannot derive top directory from {:?}", exe))
            })?;
        Ok(Self::from_top(top))
    }

    pub fn source_profiles_dir(&self) -> PathBuf {
        self.etc_dir.join("profiles")
    }

    pub fn profile_dir(&self, name: &str) -> PathBuf {
        self.work_dir.join(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlPlaneSection {
    pub cloud: String,
    pub controller: String,
    pub model: String,
    pub user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exec: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HypervisorSection {
    pub user: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactsSection {
    pub home: String,
    #[serde(alias = "builder_config_path")]
    pub builder_config_path: String,
    #[serde(alias = "bundle_name")]
    pub bundle_name: String,
    #[serde(default, alias = "run_on", skip_serializing_if = "Option::is_none")]
    pub run_on: Option<String>,
    #[serde(default, alias = "builder_exec", skip_serializing_if = "Option::is_none")]
    pub builder_exec: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterviewSection {
    pub path: String,
    #[serde(default, alias = "output_path", skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exec: Option<String>,
}

/// `main.yaml` as written on disk. Keys are camelCase; the snake_case
/// spellings are accepted on read.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileDocument {
    pub controlplane: ControlPlaneSection,
    pub hypervisor: HypervisorSection,
    pub artifacts: ArtifactsSection,
    pub interview: InterviewSection,
    #[serde(default, alias = "work_dir", skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<String>,
    #[serde(default, alias = "config_dir", skip_serializing_if = "Option::is_none")]
    pub config_dir: Option<String>,
}

impl ProfileDocument {
    pub fn parse(content: &str) -> Result<Self> {
        let doc: ProfileDocument = serde_yaml::from_str(content)
            .map_err(|e| ClusterError::Config(format!("profile not complete ({})", e)))?;
        doc.validate()?;
        Ok(doc)
    }

    fn validate(&self) -> Result<()> {
        let required = [
            ("controlplane.cloud", &self.controlplane.cloud),
            ("controlplane.controller", &self.controlplane.controller),
            ("controlplane.model", &self.controlplane.model),
            ("controlplane.user", &self.controlplane.user),
            ("hypervisor.user", &self.hypervisor.user),
            ("artifacts.home", &self.artifacts.home),
            ("artifacts.builderConfigPath", &self.artifacts.builder_config_path),
            ("artifacts.bundleName", &self.artifacts.bundle_name),
            ("interview.path", &self.interview.path),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(ClusterError::Config(format!("profile key '{}' is empty", key)));
            }
        }
        Ok(())
    }
}

/// Control-plane coordinates for this cluster. Read-only after load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlPlaneIdentity {
    pub cloud: String,
    pub controller: String,
    pub model: String,
    pub user: String,
}

impl ControlPlaneIdentity {
    /// Model name as the control plane expects it for `-m` (owner-qualified).
    pub fn qualified_model(&self) -> String {
        if self.model.contains('/') {
            self.model.clone()
        } else {
            format!("admin/{}", self.model)
        }
    }
}

/// A loaded profile with every path resolved.
#[derive(Debug, Clone)]
pub struct Profile {
    pub name: String,
    pub profile_dir: PathBuf,
    pub work_dir: PathBuf,
    pub config_dir: PathBuf,
    pub identity: ControlPlaneIdentity,
    pub controlplane_exec: PathBuf,
    pub hypervisor_user: String,
    pub artifact_home: PathBuf,
    pub builder_config_path: PathBuf,
    pub builder_exec: PathBuf,
    pub bundle_path: PathBuf,
    pub run_on: String,
    pub interview_config_path: PathBuf,
    pub interview_output_path: PathBuf,
    pub interview_exec: PathBuf,
}

pub struct ProfileResolver {
    layout: Layout,
}

impl ProfileResolver {
    pub fn new(layout: Layout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn profile_path(&self, name: &str) -> PathBuf {
        self.layout.profile_dir(name).join(PROFILE_FILE)
    }

    pub fn load(&self, name: &str) -> Result<Profile> {
        if name.is_empty() || name.contains('/') {
            return Err(ClusterError::Config(format!("invalid profile name '{}'", name)));
        }

        let path = self.profile_path(name);
        let content = std::fs::read_to_string(&path).map_err(|e| {
            ClusterError::Config(format!("cannot read profile {}: {}", path.display(), e))
        })?;
        let doc = ProfileDocument::parse(&content)?;

        let profile = self.resolve(name, doc);

        if let Err(e) = std::fs::create_dir_all(&profile.work_dir) {
            tracing::warn!(
                "[ProfileResolver] Could not create work dir {}: {}",
                profile.work_dir.display(),
                e
            );
        }

        tracing::info!("[ProfileResolver] Loaded profile '{}' from {}", name, path.display());
        Ok(profile)
    }

    fn resolve(&self, name: &str, doc: ProfileDocument) -> Profile {
        let profile_dir = self.layout.profile_dir(name);
        let work_dir = match &doc.work_dir {
            Some(dir) => resolve_against(dir, &profile_dir),
            None => profile_dir.clone(),
        };
        let config_dir = match &doc.config_dir {
            Some(dir) => resolve_against(dir, &self.layout.top_dir),
            None => self.layout.source_profiles_dir(),
        };

        let vendor = &self.layout.vendor_dir;
        let builder_exec = match &doc.artifacts.builder_exec {
            Some(exec) => resolve_against(exec, vendor),
            None => vendor.join("hpct-charms-builder/bin/charms-builder"),
        };
        let interview_exec = match &doc.interview.exec {
            Some(exec) => resolve_against(exec, vendor),
            None => vendor.join("hpct-interview/bin/hpct-interview"),
        };

        let cp = doc.controlplane;
        Profile {
            name: name.to_string(),
            identity: ControlPlaneIdentity {
                cloud: cp.cloud,
                controller: cp.controller,
                model: cp.model,
                user: cp.user,
            },
            controlplane_exec: PathBuf::from(
                cp.exec.as_deref().unwrap_or(DEFAULT_CONTROLPLANE_EXEC),
            ),
            hypervisor_user: doc.hypervisor.user,
            artifact_home: resolve_against(&doc.artifacts.home, &work_dir),
            builder_config_path: resolve_against(&doc.artifacts.builder_config_path, &work_dir),
            builder_exec,
            bundle_path: resolve_against(&doc.artifacts.bundle_name, &work_dir),
            run_on: doc
                .artifacts
                .run_on
                .unwrap_or_else(|| DEFAULT_RUN_ON.to_string()),
            interview_config_path: resolve_against(&doc.interview.path, &work_dir),
            interview_output_path: resolve_against(
                doc.interview
                    .output_path
                    .as_deref()
                    .unwrap_or(DEFAULT_INTERVIEW_OUTPUT),
                &work_dir,
            ),
            interview_exec,
            profile_dir,
            work_dir,
            config_dir,
        }
    }

    /// Source and working profile names, sorted.
    pub fn list_profiles(&self) -> (Vec<String>, Vec<String>) {
        (
            list_dir_names(&self.layout.source_profiles_dir()),
            list_dir_names(&self.layout.work_dir),
        )
    }

    /// Create working profile `dst` from source profile `src`, recording `login`
    /// as the hypervisor user.
    pub fn init_profile(&self, src: &str, dst: &str, login: &str) -> Result<PathBuf> {
        let src_dir = self.layout.source_profiles_dir().join(src);
        let dst_dir = self.layout.profile_dir(dst);

        if !src_dir.is_dir() {
            return Err(ClusterError::Config(format!(
                "failed to find profile directory {}",
                src_dir.display()
            )));
        }
        if dst_dir.exists() {
            return Err(ClusterError::Config(format!(
                "cannot overwrite working profile directory {}",
                dst_dir.display()
            )));
        }

        let content = std::fs::read_to_string(src_dir.join(PROFILE_FILE)).map_err(|e| {
            ClusterError::Config(format!("source profile has no {}: {}", PROFILE_FILE, e))
        })?;
        let mut doc = ProfileDocument::parse(&content)?;
        doc.hypervisor.user = login.to_string();
        let rendered = serde_yaml::to_string(&doc)
            .map_err(|e| ClusterError::Config(format!("cannot serialize profile: {}", e)))?;

        let copied = copy_dir_recursive(&src_dir, &dst_dir).and_then(|()| {
            std::fs::write(dst_dir.join(PROFILE_FILE), rendered).map_err(ClusterError::from)
        });
        if let Err(e) = copied {
            if let Err(cleanup) = std::fs::remove_dir_all(&dst_dir) {
                tracing::warn!(
                    "[ProfileResolver] Could not remove partial profile {}: {}",
                    dst_dir.display(),
                    cleanup
                );
            }
            return Err(e);
        }

        tracing::info!(
            "[ProfileResolver] Initialized working profile {} from {}",
            dst_dir.display(),
            src_dir.display()
        );
        Ok(dst_dir)
    }
}

fn list_dir_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| e.path().is_dir())
                .filter_map(|e| e.file_name().to_str().map(String::from))
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let path = entry.path();
        let target = dst.join(entry.file_name());
        if path.is_dir() {
            copy_dir_recursive(&path, &target)?;
        } else {
            std::fs::copy(&path, &target)?;
        }
    }
    Ok(())
}
