//! Configuration management with file persistence
//!
//! Limits are resolved once, at construction time: defaults, then the
//! optional config file, then `LOREBOOK_*` environment overrides. The
//! engine components take the resolved struct; they never read the
//! environment themselves.

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

/// Lorebook configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub graph: GraphLimits,
    pub recognition: RecognitionConfig,
}

/// Quotas and budgets for the graph store and query engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphLimits {
    /// Maximum entities per project
    pub max_nodes_per_project: u64,
    /// Maximum relations per project
    pub max_edges_per_project: u64,
    /// Maximum attribute keys on a single entity
    pub max_attribute_keys: usize,
    /// Wall-clock budget for bounded graph searches
    pub query_timeout_ms: u64,
    /// Hard cap on nodes dequeued during a bounded graph search
    pub path_expansion_limit: u64,
    /// Maximum k accepted by the k-hop subgraph query
    pub subgraph_max_k: u32,
}

/// Settings for the recognition scheduler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionConfig {
    /// Maximum simultaneously-running recognition tasks (floor 1)
    pub max_concurrency: usize,
}

impl Default for GraphLimits {
    fn default() -> Self {
        Self {
            max_nodes_per_project: 50_000,
            max_edges_per_project: 200_000,
            max_attribute_keys: 200,
            query_timeout_ms: 2_000,
            path_expansion_limit: 10_000,
            subgraph_max_k: 3,
        }
    }
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self { max_concurrency: 4 }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            graph: GraphLimits::default(),
            recognition: RecognitionConfig::default(),
        }
    }
}

impl GraphLimits {
    /// Apply `LOREBOOK_*` environment overrides to these limits
    pub fn with_env_overrides(mut self) -> Self {
        override_u64("LOREBOOK_MAX_NODES", &mut self.max_nodes_per_project);
        override_u64("LOREBOOK_MAX_EDGES", &mut self.max_edges_per_project);
        override_usize("LOREBOOK_MAX_ATTRIBUTE_KEYS", &mut self.max_attribute_keys);
        override_u64("LOREBOOK_QUERY_TIMEOUT_MS", &mut self.query_timeout_ms);
        override_u64(
            "LOREBOOK_PATH_EXPANSION_LIMIT",
            &mut self.path_expansion_limit,
        );
        override_u32("LOREBOOK_SUBGRAPH_MAX_K", &mut self.subgraph_max_k);
        self
    }

    /// Validate that every limit is a positive integer
    pub fn validate(&self) -> crate::error::Result<()> {
        let checks: [(&str, u64); 6] = [
            ("max_nodes_per_project", self.max_nodes_per_project),
            ("max_edges_per_project", self.max_edges_per_project),
            ("max_attribute_keys", self.max_attribute_keys as u64),
            ("query_timeout_ms", self.query_timeout_ms),
            ("path_expansion_limit", self.path_expansion_limit),
            ("subgraph_max_k", self.subgraph_max_k as u64),
        ];
        for (name, value) in checks {
            if value == 0 {
                return Err(crate::error::Error::ConfigError(format!(
                    "{name} must be a positive integer"
                )));
            }
        }
        Ok(())
    }
}

impl RecognitionConfig {
    /// Apply `LOREBOOK_*` environment overrides
    pub fn with_env_overrides(mut self) -> Self {
        override_usize(
            "LOREBOOK_RECOGNITION_MAX_CONCURRENCY",
            &mut self.max_concurrency,
        );
        self
    }
}

fn override_u64(var: &str, slot: &mut u64) {
    if let Ok(raw) = env::var(var) {
        if let Ok(value) = raw.trim().parse::<u64>() {
            if value > 0 {
                *slot = value;
            }
        }
    }
}

fn override_u32(var: &str, slot: &mut u32) {
    if let Ok(raw) = env::var(var) {
        if let Ok(value) = raw.trim().parse::<u32>() {
            if value > 0 {
                *slot = value;
            }
        }
    }
}

fn override_usize(var: &str, slot: &mut usize) {
    if let Ok(raw) = env::var(var) {
        if let Ok(value) = raw.trim().parse::<usize>() {
            if value > 0 {
                *slot = value;
            }
        }
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("LOREBOOK_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("lorebook")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from file, or defaults if the file doesn't exist,
    /// then apply environment overrides
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;

        let mut config = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.graph = config.graph.with_env_overrides();
        config.recognition = config.recognition.with_env_overrides();
        config.graph.validate().map_err(|e| anyhow!("{e}"))?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> anyhow::Result<()> {
        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;

        let path = Self::config_path()?;
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }
}
