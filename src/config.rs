//! YAML build configuration.
//!
//! Every section is optional; a missing file section takes its defaults.
//!
//! ```yaml
//! general:
//!   log_level: debug
//!   seed: 42
//! snapshot:
//!   format: binary
//!   compression_level: 9
//! merge:
//!   vnode_prefix: "lib_"
//! ```

use crate::merge::validate_vnode_prefix;
use crate::snapshot::SnapshotFormat;
use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use log::info;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;

const LOG_LEVELS: [&str; 6] = ["off", "error", "warn", "info", "debug", "trace"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    pub general: GeneralConfig,
    pub snapshot: SnapshotConfig,
    pub merge: MergeConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub log_level: String,
    /// Seed for RANDOM bindings; unset means a fresh seed per run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Format for written snapshots when the file extension does not decide
    pub format: SnapshotFormat,
    pub compression_level: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vnode_prefix: Option<String>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            seed: None,
        }
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            format: SnapshotFormat::Json,
            compression_level: 3,
        }
    }
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid general configuration: {0}")]
    InvalidGeneral(String),
    #[error("Invalid snapshot configuration: {0}")]
    InvalidSnapshot(String),
    #[error("Invalid merge configuration: {0}")]
    InvalidMerge(String),
}

impl BuildConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let level = self.general.log_level.to_ascii_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(ValidationError::InvalidGeneral(format!(
                "log_level '{}' is not one of {}",
                self.general.log_level,
                LOG_LEVELS.join(", ")
            )));
        }

        if !(1..=22).contains(&self.snapshot.compression_level) {
            return Err(ValidationError::InvalidSnapshot(format!(
                "compression_level must be between 1 and 22, got {}",
                self.snapshot.compression_level
            )));
        }

        if let Some(prefix) = &self.merge.vnode_prefix {
            validate_vnode_prefix(prefix).map_err(|e| ValidationError::InvalidMerge(e.to_string()))?;
        }

        Ok(())
    }
}

/// Load and validate configuration from a YAML file
pub fn load_config(config_path: &Path) -> Result<BuildConfig> {
    info!("Loading configuration from: {:?}", config_path);

    let file = File::open(config_path)
        .wrap_err_with(|| format!("Failed to open config file {}", config_path.display()))?;
    let config: BuildConfig = serde_yaml::from_reader(file)
        .wrap_err_with(|| format!("Failed to parse config file {}", config_path.display()))?;

    config.validate()?;
    Ok(config)
}
