//! Cluster manifest generation.
//!
//! The manifest is rendered from an embedded template, parsed back and checked
//! before it is written, so a manifest on disk always declares every
//! application its relations reference.
mod embedded_templates;
mod template_renderer;

pub use template_renderer::TemplateRenderer;

use crate::error::{ClusterError, Result};
use crate::topology::{ClusterTopology, Role};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tera::Context;

/// Every application the manifest declares, principals first.
pub const APP_NAMES: &[&str] = &[
    "compute-node",
    "head-node",
    "interactive-node",
    "ldap-node",
    "nfs-node",
    "slurm-node",
    "ldap-client",
    "ldap-server",
    "slurm-client",
    "slurm-client-compute",
    "slurm-server",
];

/// Built artifact each application deploys. Both slurm clients share one.
const ARTIFACTS: &[(&str, &str)] = &[
    ("compute-node", "hpct-compute-node-operator"),
    ("head-node", "hpct-head-node-operator"),
    ("interactive-node", "hpct-interactive-node-operator"),
    ("ldap-node", "hpct-ldap-node-operator"),
    ("nfs-node", "hpct-nfs-node-operator"),
    ("slurm-node", "hpct-slurm-node-operator"),
    ("ldap-client", "hpct-ldap-client-operator"),
    ("ldap-server", "hpct-ldap-server-operator"),
    ("slurm-client", "hpct-slurm-client-operator"),
    ("slurm-client-compute", "hpct-slurm-client-operator"),
    ("slurm-server", "hpct-slurm-server-operator"),
];

/// Applications deployed alongside a principal rather than on their own units.
pub const SUBORDINATES: &[&str] = &[
    "ldap-client",
    "ldap-server",
    "slurm-client",
    "slurm-client-compute",
    "slurm-server",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub charm: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_units: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bundle {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series: Option<String>,
    pub applications: BTreeMap<String, Application>,
    #[serde(default)]
    pub relations: Vec<[String; 2]>,
}

impl Bundle {
    pub fn application(&self, name: &str) -> Option<&Application> {
        self.applications.get(name)
    }

    /// Application names referenced by relation endpoints (`app:interface`).
    pub fn related_applications(&self) -> BTreeSet<&str> {
        self.relations
            .iter()
            .flat_map(|pair| pair.iter())
            .map(|endpoint| endpoint.split(':').next().unwrap_or(endpoint.as_str()))
            .collect()
    }

    /// Every relation endpoint names a declared application, and every
    /// subordinate is declared.
    pub fn check_closure(&self) -> Result<()> {
        for pair in &self.relations {
            for endpoint in pair {
                let Some((app, interface)) = endpoint.split_once(':') else {
                    return Err(ClusterError::Config(format!(
                        "relation endpoint '{}' is not app:interface",
                        endpoint
                    )));
                };
                if interface.is_empty() || !self.applications.contains_key(app) {
                    return Err(ClusterError::Config(format!(
                        "relation endpoint '{}' references undeclared application",
                        endpoint
                    )));
                }
            }
        }

        if let Some(missing) = SUBORDINATES
            .iter()
            .find(|s| !self.applications.contains_key(**s))
        {
            return Err(ClusterError::Config(format!(
                "subordinate '{}' is not declared",
                missing
            )));
        }
        Ok(())
    }
}

/// A manifest that was written to disk.
#[derive(Debug, Clone)]
pub struct GeneratedBundle {
    pub path: PathBuf,
    pub text: String,
    pub bundle: Bundle,
}

pub struct BundleGenerator {
    path: PathBuf,
}

impl BundleGenerator {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the manifest if present.
    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            tracing::debug!("[BundleGenerator] Removing old {}", self.path.display());
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    /// Render, check and write the manifest for `topology`.
    ///
    /// Any previous manifest is removed first: a failed generation leaves no
    /// manifest rather than a stale one.
    pub fn generate(&self, topology: &ClusterTopology) -> Result<GeneratedBundle> {
        self.clear()?;

        let text = render(topology)?;
        let bundle: Bundle = serde_yaml::from_str(&text)
            .map_err(|e| ClusterError::Config(format!("rendered manifest is not valid: {}", e)))?;
        bundle.check_closure()?;
        check_charm_paths(&bundle, topology)?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, &text)?;

        tracing::info!(
            "[BundleGenerator] Wrote {} ({} applications, {} relations)",
            self.path.display(),
            bundle.applications.len(),
            bundle.relations.len()
        );

        Ok(GeneratedBundle {
            path: self.path.clone(),
            text,
            bundle,
        })
    }
}

fn validate(topology: &ClusterTopology) -> Result<()> {
    if let Some(role) = Role::ALL.iter().find(|r| topology.count(**r).is_none()) {
        return Err(ClusterError::Config(format!("topology has no count for role '{}'", role)));
    }
    if topology.artifact_home.as_os_str().is_empty() {
        return Err(ClusterError::Config("artifact home is empty".to_string()));
    }
    if topology.run_on.trim().is_empty() {
        return Err(ClusterError::Config("artifact run-on suffix is empty".to_string()));
    }
    Ok(())
}

/// Artifact path for every application, keyed by application name.
pub fn charm_paths(topology: &ClusterTopology) -> BTreeMap<&'static str, String> {
    let home = topology.artifact_home.to_string_lossy();
    let home = home.trim_end_matches('/');
    ARTIFACTS
        .iter()
        .map(|(app, artifact)| {
            let path = format!("{}/{}_{}.charm", home, artifact, topology.run_on);
            (*app, path)
        })
        .collect()
}

/// Every parsed `charm` is exactly the artifact path built for its application.
fn check_charm_paths(bundle: &Bundle, topology: &ClusterTopology) -> Result<()> {
    for (app, expected) in charm_paths(topology) {
        let actual = bundle.application(app).map(|a| a.charm.as_str());
        if actual != Some(expected.as_str()) {
            return Err(ClusterError::Config(format!(
                "charm for '{}' is {:?} in the rendered manifest, expected {:?}",
                app, actual, expected
            )));
        }
    }
    Ok(())
}

/// Manifest text for `topology`. Same topology, same bytes.
pub fn render(topology: &ClusterTopology) -> Result<String> {
    validate(topology)?;

    let units: BTreeMap<&str, u32> = topology
        .counts
        .iter()
        .map(|(role, count)| (role.key(), *count))
        .collect();

    // Template keys cannot contain '-'.
    let charms: BTreeMap<String, String> = charm_paths(topology)
        .into_iter()
        .map(|(app, path)| (app.replace('-', "_"), path))
        .collect();

    let mut context = Context::new();
    context.insert("charms", &charms);
    context.insert("units", &units);

    TemplateRenderer::from_embedded()?
        .render_with_context(embedded_templates::BUNDLE_TEMPLATE, &context)
}
