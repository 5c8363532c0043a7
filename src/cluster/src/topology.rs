//! Cluster topology: unit count per node role.
use crate::error::{ClusterError, Result};
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// The canonical node roles. Anything else in interview results is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Role {
    Compute,
    Head,
    Interactive,
    Ldap,
    Slurm,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::Compute,
        Role::Head,
        Role::Interactive,
        Role::Ldap,
        Role::Slurm,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Role::Compute => "compute",
            Role::Head => "head",
            Role::Interactive => "interactive",
            Role::Ldap => "ldap",
            Role::Slurm => "slurm",
        }
    }

    /// Count used when the interview says nothing about this role.
    pub fn baseline(&self) -> u32 {
        match self {
            Role::Interactive => 0,
            _ => 1,
        }
    }

    /// Principal application deploying this role.
    pub fn application(&self) -> &'static str {
        match self {
            Role::Compute => "compute-node",
            Role::Head => "head-node",
            Role::Interactive => "interactive-node",
            Role::Ldap => "ldap-node",
            Role::Slurm => "slurm-node",
        }
    }

    /// Accepts both the flat key (`compute`) and the interview's `nodes` key (`ncompute`).
    pub fn from_key(key: &str) -> Option<Role> {
        let key = key.strip_prefix('n').filter(|k| Self::lookup(k).is_some()).unwrap_or(key);
        Self::lookup(key)
    }

    fn lookup(key: &str) -> Option<Role> {
        Role::ALL.into_iter().find(|r| r.key() == key)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterTopology {
    pub counts: BTreeMap<Role, u32>,
    pub artifact_home: PathBuf,
    pub run_on: String,
}

impl ClusterTopology {
    /// Topology with every role at its baseline count.
    pub fn baseline(artifact_home: impl Into<PathBuf>, run_on: impl Into<String>) -> Self {
        Self {
            counts: Role::ALL.into_iter().map(|r| (r, r.baseline())).collect(),
            artifact_home: artifact_home.into(),
            run_on: run_on.into(),
        }
    }

    pub fn with_count(mut self, role: Role, count: u32) -> Self {
        self.counts.insert(role, count);
        self
    }

    pub fn count(&self, role: Role) -> Option<u32> {
        self.counts.get(&role).copied()
    }

    /// Merge interview answers: either a flat `role: count` mapping or the
    /// nested `nodes: { n<role>: count }` form. Unknown keys are ignored.
    pub fn merge_answers(&mut self, answers: &Value) -> Result<()> {
        let mapping = match answers {
            Value::Null => return Ok(()),
            Value::Mapping(m) => m,
            _ => {
                return Err(ClusterError::Config(
                    "interview results must be a mapping".to_string(),
                ))
            }
        };

        self.merge_mapping(mapping)?;
        match mapping.get("nodes") {
            Some(Value::Mapping(nodes)) => self.merge_mapping(nodes)?,
            Some(Value::Null) | None => {}
            Some(_) => {
                return Err(ClusterError::Config(
                    "interview 'nodes' must be a mapping".to_string(),
                ))
            }
        }
        Ok(())
    }

    fn merge_mapping(&mut self, mapping: &serde_yaml::Mapping) -> Result<()> {
        for (key, value) in mapping {
            let Some(role) = key.as_str().and_then(Role::from_key) else {
                continue;
            };
            let count = value
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| {
                    ClusterError::Config(format!(
                        "count for role '{}' must be a non-negative integer, got {:?}",
                        role, value
                    ))
                })?;
            self.counts.insert(role, count);
        }
        Ok(())
    }
}

/// Load the topology from interview results. A missing file yields the baseline.
pub fn load_topology(
    results_path: &Path,
    artifact_home: impl Into<PathBuf>,
    run_on: impl Into<String>,
) -> Result<ClusterTopology> {
    let mut topology = ClusterTopology::baseline(artifact_home, run_on);

    if !results_path.exists() {
        tracing::info!(
            "[Topology] No interview results at {}, using defaults",
            results_path.display()
        );
        return Ok(topology);
    }

    let content = std::fs::read_to_string(results_path)?;
    let answers: Value = serde_yaml::from_str(&content).map_err(|e| {
        ClusterError::Config(format!(
            "malformed interview results {}: {}",
            results_path.display(),
            e
        ))
    })?;
    topology.merge_answers(&answers)?;

    tracing::debug!("[Topology] Loaded {:?}", topology.counts);
    Ok(topology)
}
