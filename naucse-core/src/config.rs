//! Configuration management.

use crate::error::{ArchiveError, Result};
use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Upper bound on resolver rounds.
///
/// Lessons link to each other; a round fetches every lesson discovered in the
/// previous one. Real courses settle in a handful of rounds, so hitting this
/// bound means the reference graph keeps producing new slugs.
pub const DEFAULT_MAX_RESOLUTION_ROUNDS: usize = 50;

/// Longest accepted refetch window: one year.
pub const MAX_REFETCH_INTERVAL_SECS: u64 = 366 * 24 * 3600;

/// Persistent configuration for the archiver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Container tool to drive (`podman` or `docker`).
    pub container_tool: String,
    pub data_dir: PathBuf,
    pub output_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub max_resolution_rounds: usize,
    /// Fetches of the same remote within this window are skipped.
    pub refetch_interval_secs: u64,
    /// Depth of the first (shallow) fetch of a new remote.
    pub fetch_depth: u32,
    /// Python version used when the lockfile does not name one.
    pub default_python_version: String,
    pub image_prefix: String,
    pub default_timezone: String,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            container_tool: "podman".to_string(),
            data_dir: paths::data_dir(),
            output_dir: paths::output_dir(),
            cache_dir: paths::cache_dir(),
            max_resolution_rounds: DEFAULT_MAX_RESOLUTION_ROUNDS,
            refetch_interval_secs: 3600,
            fetch_depth: 10,
            default_python_version: "3.6".to_string(),
            image_prefix: "localhost/naucse".to_string(),
            default_timezone: "Europe/Prague".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_path())
    }

    /// Load configuration from `path`, falling back to defaults if it is missing.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| ArchiveError::InvalidConfig {
            reason: format!("Failed to read config: {}", e),
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|e| ArchiveError::InvalidConfig {
            reason: format!("Failed to parse config: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to `path`.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ArchiveError::io(parent, e))?;
        }
        let content = serde_json::to_string_pretty(self).map_err(|e| ArchiveError::InvalidConfig {
            reason: format!("Failed to serialize config: {}", e),
        })?;
        std::fs::write(path, content).map_err(|e| ArchiveError::io(path, e))
    }

    /// Reject values that would make the pipeline misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.max_resolution_rounds == 0 {
            return Err(ArchiveError::InvalidConfig {
                reason: "max_resolution_rounds must be at least 1".into(),
            });
        }
        if self.refetch_interval_secs > MAX_REFETCH_INTERVAL_SECS {
            return Err(ArchiveError::InvalidConfig {
                reason: format!(
                    "refetch_interval_secs must be at most {}",
                    MAX_REFETCH_INTERVAL_SECS
                ),
            });
        }
        if self.container_tool.trim().is_empty() {
            return Err(ArchiveError::InvalidConfig { reason: "container_tool is empty".into() });
        }
        Ok(())
    }

    /// The refetch window, clamped to [`MAX_REFETCH_INTERVAL_SECS`].
    pub fn refetch_interval(&self) -> chrono::Duration {
        i64::try_from(self.refetch_interval_secs.min(MAX_REFETCH_INTERVAL_SECS))
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }

    /// Directory holding the pip cache mounted into builds and containers.
    pub fn pip_cache_dir(&self) -> PathBuf {
        paths::pip_cache_dir(&self.data_dir)
    }
}
