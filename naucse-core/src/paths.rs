//! Centralized path configuration for the archiver.
//!
//! All default locations go through this module so the CLI and the
//! library agree on where data, output and caches live.

use std::path::{Path, PathBuf};

/// Pip cache shared by image builds and containers, relative to the data dir.
pub const PIP_CACHE_DIR: &str = ".naucse-archive/pip-cache";

/// Get the data directory (contains `courses/` and/or `runs/`).
///
/// Resolution order:
/// 1. `NAUCSE_DATA_DIR` environment variable
/// 2. the current working directory
pub fn data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("NAUCSE_DATA_DIR") {
        return PathBuf::from(dir);
    }
    current_dir()
}

/// Get the default output directory: `archived` in the current directory.
pub fn output_dir() -> PathBuf {
    current_dir().join("archived")
}

/// Get the default cache directory: `.cache/naucse/archive` in the current directory.
pub fn cache_dir() -> PathBuf {
    current_dir().join(".cache").join("naucse").join("archive")
}

/// Get the pip cache directory for a given data directory.
pub fn pip_cache_dir(data_dir: &Path) -> PathBuf {
    data_dir.join(PIP_CACHE_DIR)
}

/// Get the path to the configuration file.
///
/// Resolution order:
/// 1. `NAUCSE_ARCHIVE_CONFIG` environment variable
/// 2. `<config dir>/naucse-archive/config.json`
/// 3. `.naucse-archive/config.json` in the current directory
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("NAUCSE_ARCHIVE_CONFIG") {
        return PathBuf::from(path);
    }
    dirs::config_dir()
        .map(|d| d.join("naucse-archive").join("config.json"))
        .unwrap_or_else(|| current_dir().join(".naucse-archive").join("config.json"))
}

fn current_dir() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pip_cache_under_data_dir() {
        let data = PathBuf::from("/srv/naucse");
        let pip = pip_cache_dir(&data);
        assert!(pip.starts_with(&data));
        assert!(pip.ends_with("pip-cache"));
    }

    #[test]
    fn test_cache_dir_layout() {
        assert!(cache_dir().ends_with(".cache/naucse/archive"));
        assert!(output_dir().ends_with("archived"));
    }
}
