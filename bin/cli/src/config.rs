//! CLI configuration.
//!
//! Loaded via the `config` crate from `TASKFLOW__*` environment variables,
//! e.g. `TASKFLOW__STORE_DIR` or `TASKFLOW__ENGINE__RETRY_DELAY_MS`.

use serde::Deserialize;
use std::path::PathBuf;
use taskflow_workflow::EngineConfig;

/// Configuration for the `taskflow` binary.
#[derive(Debug, Clone, Deserialize)]
pub struct CliConfig {
    /// Directory the file store keeps workflow definitions in.
    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,

    /// Engine defaults applied to every run.
    #[serde(default)]
    pub engine: EngineConfig,
}

fn default_store_dir() -> PathBuf {
    PathBuf::from("workflows")
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            store_dir: default_store_dir(),
            engine: EngineConfig::default(),
        }
    }
}

impl CliConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable cannot be parsed into its field.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Self::from_source(environment())
    }

    fn from_source(source: config::Environment) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(source)
            .build()?
            .try_deserialize()
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix("TASKFLOW")
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}
