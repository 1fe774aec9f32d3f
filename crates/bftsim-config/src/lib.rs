//! Configuration management for bftsim
//!
//! Provides hierarchical configuration loading from multiple sources:
//! 1. Environment variables (BFTSIM_* prefix, `__` between sections)
//! 2. bftsim.local.toml (gitignored, local overrides)
//! 3. bftsim.toml (git-tracked, project config)
//! 4. ~/.config/bftsim/config.toml (user defaults)
//! 5. Built-in defaults (lowest precedence)
//!
//! ```toml
//! [cluster]
//! f = 1
//! replicas = [
//!     { host = "localhost", port = "12345" },
//!     { host = "localhost", port = "12346" },
//!     { host = "localhost", port = "12347" },
//!     { host = "localhost", port = "12348" },
//! ]
//!
//! [simulation]
//! mode = "until-idle"
//! max_steps = 100000
//! ```

use anyhow::Result;
use bftsim_types::{ClusterConfig, GroupId, ReplicaAddress};
use serde::{Deserialize, Serialize};
use std::path::Path;

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::{ConfigLoader, from_toml_str};
pub use paths::Paths;

/// Main bftsim configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BftsimConfig {
    pub cluster: ClusterSection,
    pub simulation: SimulationSection,
    pub logging: LoggingSection,
}

/// Replica group membership and fault threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSection {
    pub group: u32,
    pub f: usize,
    pub replicas: Vec<ReplicaAddress>,
}

impl Default for ClusterSection {
    fn default() -> Self {
        Self {
            group: 0,
            f: 0,
            replicas: vec![ReplicaAddress::new("localhost", "12345")],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSection {
    pub mode: SimulationMode,
    /// Upper bound on run-loop steps; 0 means unbounded.
    pub max_steps: u64,
}

impl Default for SimulationSection {
    fn default() -> Self {
        Self {
            mode: SimulationMode::UntilIdle,
            max_steps: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SimulationMode {
    /// Run until no messages are queued and no timers are pending.
    UntilIdle,
    /// Run until explicitly stopped.
    Continuous,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Default `tracing` directive when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl BftsimConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        ConfigLoader::new().load()
    }

    /// Load configuration from specific project directory
    pub fn load_from_dir(project_dir: impl AsRef<Path>) -> Result<Self> {
        ConfigLoader::new().with_project_dir(project_dir).load()
    }

    /// Validates the cluster section and builds the group configuration.
    pub fn cluster_config(&self) -> Result<ClusterConfig, ConfigError> {
        let cluster = &self.cluster;
        let mut seen = std::collections::BTreeSet::new();
        for addr in &cluster.replicas {
            if !seen.insert(addr) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate replica address {addr}"
                )));
            }
        }
        ClusterConfig::try_new(GroupId::new(cluster.group), cluster.f, cluster.replicas.clone())
            .map_err(|e| ConfigError::ValidationError(e.to_string()))
    }
}
