//! Controller configuration and cluster snapshots
//!
//! The controller reads a small YAML file (default
//! `~/.inplace-rollout/config.yaml`). Missing files mean defaults. Cluster
//! state for the `simulate`, `plan` and `validate` commands comes from a
//! snapshot file, see [`snapshot`].

pub mod snapshot;
pub mod validation;

pub use snapshot::{load_snapshot_file, ClusterSnapshot, SnapshotFormat};
pub use validation::{
    validate_snapshot, ValidationMessage, ValidationResult, ValidationSeverity,
};

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Seconds between controller ticks
pub const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 10;

/// Upper bound on passes run by `simulate`
pub const DEFAULT_MAX_PASSES: usize = 50;

/// Default config file location: ~/.inplace-rollout/config.yaml
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".inplace-rollout")
        .join("config.yaml")
}

/// Expand `~` and environment variables in a user-supplied path
pub fn expand_path(path: &str) -> PathBuf {
    match shellexpand::full(path) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => PathBuf::from(shellexpand::tilde(path).as_ref()),
    }
}

/// Errors for configuration and snapshot files
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse {0}: {1}")]
    ParseError(String, String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Settings of the rollout controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Annotate nodes so the cluster autoscaler leaves them alone during a rollout
    #[serde(default = "default_true")]
    pub autoscaler_scale_down_annotation_during_rollout: bool,

    /// Taint nodes of old machine sets with prefer-no-schedule
    #[serde(default = "default_true")]
    pub taint_old_machine_sets: bool,

    /// Seconds between reconcile ticks
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,

    /// Passes `simulate` runs before giving up
    #[serde(default = "default_max_passes")]
    pub max_passes: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            autoscaler_scale_down_annotation_during_rollout: true,
            taint_old_machine_sets: true,
            reconcile_interval_secs: DEFAULT_RECONCILE_INTERVAL_SECS,
            max_passes: DEFAULT_MAX_PASSES,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_reconcile_interval() -> u64 {
    DEFAULT_RECONCILE_INTERVAL_SECS
}

fn default_max_passes() -> usize {
    DEFAULT_MAX_PASSES
}

impl ControllerConfig {
    /// Reject settings the controller cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reconcile_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "reconcile_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.max_passes == 0 {
            return Err(ConfigError::Invalid(
                "max_passes must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// SBIO: Pure parsing (no I/O)
// ============================================================================

/// Parse and validate a controller config from YAML
pub fn parse_config(content: &str) -> Result<ControllerConfig, ConfigError> {
    let config: ControllerConfig = if content.trim().is_empty() {
        ControllerConfig::default()
    } else {
        serde_yaml::from_str(content)
            .map_err(|e| ConfigError::ParseError("config".to_string(), e.to_string()))?
    };
    config.validate()?;
    Ok(config)
}

// ============================================================================
// I/O boundary functions
// ============================================================================

/// Load config from the default location
pub fn load_config() -> Result<ControllerConfig, ConfigError> {
    load_config_from(&default_config_path())
}

/// Load config from a specific path; a missing file yields defaults
pub fn load_config_from(path: &Path) -> Result<ControllerConfig, ConfigError> {
    if !path.exists() {
        return Ok(ControllerConfig::default());
    }
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let config = ControllerConfig::default();
        assert!(config.autoscaler_scale_down_annotation_during_rollout);
        assert!(config.taint_old_machine_sets);
        assert_eq!(config.reconcile_interval_secs, 10);
        assert_eq!(config.max_passes, DEFAULT_MAX_PASSES);
    }

    #[test]
    fn test_parse_partial_config() {
        let config = parse_config("taint_old_machine_sets: false\nmax_passes: 7\n").unwrap();
        assert!(!config.taint_old_machine_sets);
        assert!(config.autoscaler_scale_down_annotation_during_rollout);
        assert_eq!(config.max_passes, 7);
        assert_eq!(config.reconcile_interval_secs, DEFAULT_RECONCILE_INTERVAL_SECS);
    }

    #[test]
    fn test_parse_empty_config() {
        assert_eq!(parse_config("  \n").unwrap(), ControllerConfig::default());
    }

    #[test]
    fn test_parse_rejects_zero_interval() {
        let result = parse_config("reconcile_interval_secs: 0");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let result = parse_config("max_passes: [1, 2");
        assert!(matches!(result, Err(ConfigError::ParseError(_, _))));
    }

    #[test]
    fn test_load_config_from_file() {
        let file = create_temp_file("autoscaler_scale_down_annotation_during_rollout: false\n");
        let config = load_config_from(file.path()).unwrap();
        assert!(!config.autoscaler_scale_down_annotation_during_rollout);
    }

    #[test]
    fn test_missing_config_is_default() {
        let config = load_config_from(Path::new("/nonexistent/inplace-rollout.yaml")).unwrap();
        assert_eq!(config, ControllerConfig::default());
    }

    #[test]
    fn test_default_config_path() {
        let path = default_config_path();
        assert!(path.ends_with(".inplace-rollout/config.yaml"));
    }

    #[test]
    fn test_expand_path_tilde() {
        let expanded = expand_path("~/snapshots/fleet.yaml");
        assert!(expanded.ends_with("snapshots/fleet.yaml"));
        assert_eq!(expand_path("/abs/fleet.yaml"), PathBuf::from("/abs/fleet.yaml"));
    }
}
