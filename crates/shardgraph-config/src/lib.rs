//! Configuration management for shardgraph
//!
//! Provides hierarchical configuration loading from multiple sources:
//! 1. Environment variables (SHARDGRAPH_* prefix, highest precedence)
//! 2. shardgraph.local.toml (gitignored, local overrides)
//! 3. shardgraph.toml (git-tracked, project config)
//! 4. ~/.config/shardgraph/config.toml (user defaults)
//! 5. Built-in defaults (lowest precedence)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use paths::Paths;

/// Main shardgraph configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShardgraphConfig {
    pub engine: EngineConfig,
    pub repartition: RepartitionConfig,
    pub external: ExternalConfig,
}

/// Placement engine settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Replicas every user keeps at minimum.
    pub min_num_replicas: usize,
    /// Seed of the engine's random generator.
    pub seed: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_num_replicas: 2,
            seed: 42,
        }
    }
}

/// Which search runs on `DOWNTIME`
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    None,
    #[default]
    LocalSearch,
    ReplicaLocalSearch,
    Annealing,
    ReplicaAnnealing,
    External,
}

impl Strategy {
    /// Returns true for strategies that optimise the replica count.
    pub fn is_replica_aware(self) -> bool {
        matches!(self, Strategy::ReplicaLocalSearch | Strategy::ReplicaAnnealing)
    }
}

/// Search parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepartitionConfig {
    pub strategy: Strategy,

    // Local search
    pub gamma: f64,
    pub k: usize,
    pub max_iterations: usize,

    // Annealing
    pub initial_t: f64,
    pub delta_t: f64,
    pub alpha: f64,
    pub restarts: usize,
    pub incremental: bool,
}

impl Default for RepartitionConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            gamma: 1.5,
            k: 3,
            max_iterations: 100,
            initial_t: 2.0,
            delta_t: 0.01,
            alpha: 2.0,
            restarts: 4,
            incremental: false,
        }
    }
}

/// External partitioner settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalConfig {
    /// METIS-compatible executable, looked up on `PATH` if relative.
    pub executable: PathBuf,
    /// Where graph and partition files are written.
    pub temp_dir: PathBuf,
}

impl Default for ExternalConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("gpmetis"),
            temp_dir: Paths::scratch_dir(""),
        }
    }
}

impl ShardgraphConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        ConfigLoader::new().load()
    }

    /// Load configuration from specific project directory
    pub fn load_from_dir(project_dir: impl AsRef<Path>) -> Result<Self> {
        ConfigLoader::new().with_project_dir(project_dir).load()
    }

    /// Configuration that minimises replicas instead of the edge cut
    pub fn replica_aware() -> Self {
        Self {
            repartition: RepartitionConfig {
                strategy: Strategy::ReplicaLocalSearch,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Rejects parameter combinations the searches cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let r = &self.repartition;
        if r.gamma.is_nan() || r.gamma < 1.0 {
            return Err(ConfigError::ValidationError(format!(
                "repartition.gamma must be at least 1, got {}",
                r.gamma
            )));
        }
        if r.k == 0 {
            return Err(ConfigError::ValidationError(
                "repartition.k must be positive".to_string(),
            ));
        }
        if r.initial_t.is_nan() || r.initial_t < 1.0 {
            return Err(ConfigError::ValidationError(format!(
                "repartition.initial_t must be at least 1, got {}",
                r.initial_t
            )));
        }
        if r.delta_t.is_nan() || r.delta_t <= 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "repartition.delta_t must be positive, got {}",
                r.delta_t
            )));
        }
        if r.restarts == 0 {
            return Err(ConfigError::ValidationError(
                "repartition.restarts must be positive".to_string(),
            ));
        }
        if r.strategy == Strategy::External && self.external.executable.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "external.executable is required for the external strategy".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve relative paths to absolute
    pub fn resolve_paths(&mut self, base_dir: impl AsRef<Path>) {
        let base = base_dir.as_ref();

        if self.external.temp_dir.is_relative() {
            self.external.temp_dir = base.join(&self.external.temp_dir);
        }
    }

    /// Render as TOML, e.g. to seed a shardgraph.toml
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}
