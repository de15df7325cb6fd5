use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_MAX_GROUP_DEPTH, DEFAULT_OPERATION_TIMEOUT_SECS, DEFAULT_OUTPUT_TEMPLATE,
    MAX_CONCURRENT_OPERATIONS_CAP,
};

/// Runtime configuration of the collector.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CollectorConfig {
    pub version: String,
    /// Definition files or directories loaded as bundled (file) sources.
    #[serde(default)]
    pub definition_paths: Vec<PathBuf>,
    /// Directory backing the persisted definition store. No store, no
    /// reconciliation.
    #[serde(default)]
    pub datastore_dir: Option<PathBuf>,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_output_template")]
    pub output_template: String,
    #[serde(default)]
    pub split_output_by_artifact: bool,
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,
    #[serde(default)]
    pub max_concurrent_operations: Option<usize>,
    #[serde(default = "default_max_group_depth")]
    pub max_group_depth: usize,
    /// Register the built-in definitions before any file source.
    #[serde(default = "default_true")]
    pub load_bundled_definitions: bool,
}

fn default_output_dir() -> PathBuf {
    std::env::temp_dir().join("artifact-collector")
}

fn default_output_template() -> String {
    DEFAULT_OUTPUT_TEMPLATE.to_string()
}

fn default_operation_timeout_secs() -> u64 {
    DEFAULT_OPERATION_TIMEOUT_SECS
}

fn default_max_group_depth() -> usize {
    DEFAULT_MAX_GROUP_DEPTH
}

fn default_true() -> bool {
    true
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            definition_paths: Vec::new(),
            datastore_dir: None,
            output_dir: default_output_dir(),
            output_template: default_output_template(),
            split_output_by_artifact: false,
            operation_timeout_secs: DEFAULT_OPERATION_TIMEOUT_SECS,
            max_concurrent_operations: None,
            max_group_depth: DEFAULT_MAX_GROUP_DEPTH,
            load_bundled_definitions: true,
        }
    }
}

impl CollectorConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path.display()))?;

        let config: CollectorConfig = serde_yaml::from_str(&content)
            .context("Failed to parse YAML config")?;

        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Save configuration to a YAML file
    pub fn save_to_yaml_file(&self, path: &Path) -> Result<()> {
        let yaml = serde_yaml::to_string(self)
            .context("Failed to serialize config to YAML")?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .context(format!("Failed to create directory: {}", parent.display()))?;
            }
        }

        fs::write(path, yaml)
            .context(format!("Failed to write config to {}", path.display()))?;

        info!("Saved configuration to {}", path.display());
        Ok(())
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs.max(1))
    }

    /// Concurrency limit for in-flight remote operations.
    pub fn max_concurrent_operations(&self) -> usize {
        self.max_concurrent_operations
            .unwrap_or_else(|| std::cmp::min(num_cpus::get() * 2, MAX_CONCURRENT_OPERATIONS_CAP))
            .max(1)
    }
}

/// Load a configuration file or create a default one.
///
/// * `Some(path)` that exists is parsed.
/// * `Some(path)` that does not exist gets a default configuration written
///   to it.
/// * `None` uses the defaults without touching the filesystem.
pub fn load_or_create_config(config_path: Option<&Path>) -> Result<CollectorConfig> {
    match config_path {
        Some(path) if path.exists() => CollectorConfig::from_yaml_file(path),
        Some(path) => {
            info!("Creating default config at {}", path.display());
            let config = CollectorConfig::default();
            config.save_to_yaml_file(path)?;
            Ok(config)
        }
        None => {
            info!("No config path provided, using default configuration");
            Ok(CollectorConfig::default())
        }
    }
}
