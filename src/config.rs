use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("worker_threads must be at least 1 when set")]
    ZeroWorkers,
}

/// Top-level settings. Every section has defaults, so `{}` is a valid file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub compile: CompileConfig,
    pub transform: TransformConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileConfig {
    /// Check the MAPPINGS section against the fields that need it.
    pub validate_mappings: bool,
    /// Skip expansion and semantic checks when parsing reported errors.
    pub stop_on_parse_errors: bool,
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self {
            validate_mappings: true,
            stop_on_parse_errors: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    /// Process per-row records on a rayon pool.
    pub parallel: bool,
    /// Size of a dedicated pool. `None` uses the global pool.
    pub worker_threads: Option<usize>,
    /// Emit a warning when a field-based value has no data in a row.
    pub report_missing_values: bool,
    /// Drop list slots left empty by explicit-index padding.
    pub prune_empty_list_entries: bool,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            worker_threads: None,
            report_missing_values: true,
            prune_empty_list_entries: true,
        }
    }
}

impl Config {
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the JSON is malformed or a value is out
    /// of range.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file cannot be read or is invalid.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.transform.worker_threads == Some(0) {
            return Err(ConfigError::ZeroWorkers);
        }
        Ok(())
    }
}
