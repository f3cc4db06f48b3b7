//! On-disk cache of dependency-resolution results.
//!
//! Resolving a loose `requirements.txt` into a fully pinned, hashed listing
//! is slow but stable for a given input, so results are stored by the digest
//! of the input listing.
//!
//! # Layout
//!
//! ```text
//! <cache root>/
//! └── piptools-3.6-a1b2c3.../
//!     ├── input.txt   # the listing that was resolved
//!     └── output.txt  # the pinned result
//! ```

use crate::error::{ArchiveError, Result};
use crate::hash::content_digest;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const INPUT_FILE: &str = "input.txt";
const OUTPUT_FILE: &str = "output.txt";

/// Cache of resolver outputs keyed by (tool, runtime version, input digest).
#[derive(Debug, Clone)]
pub struct ResolutionCache {
    root: PathBuf,
}

impl ResolutionCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the entry for this key.
    pub fn entry_dir(&self, tool: &str, runtime_version: &str, input: &str) -> PathBuf {
        self.root.join(format!("{}-{}-{}", tool, runtime_version, content_digest(input)))
    }

    /// Return the cached output for `input`, if any.
    pub fn lookup(&self, tool: &str, runtime_version: &str, input: &str) -> Result<Option<String>> {
        let output_path = self.entry_dir(tool, runtime_version, input).join(OUTPUT_FILE);
        match std::fs::read_to_string(&output_path) {
            Ok(output) => {
                info!("Resolution cache hit: {}", output_path.display());
                Ok(Some(output))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Resolution cache miss: {}", output_path.display());
                Ok(None)
            }
            Err(e) => Err(ArchiveError::io(output_path, e)),
        }
    }

    /// Store `output` as the result of resolving `input`.
    ///
    /// Each file is written to a temporary sibling and renamed into place, and
    /// `output.txt` goes last, so readers never see a partial entry.
    /// Concurrent writers of the same key are harmless: the last one wins.
    pub fn store(
        &self,
        tool: &str,
        runtime_version: &str,
        input: &str,
        output: &str,
    ) -> Result<()> {
        let dir = self.entry_dir(tool, runtime_version, input);
        std::fs::create_dir_all(&dir).map_err(|e| ArchiveError::io(&dir, e))?;
        write_atomic(&dir, INPUT_FILE, input)?;
        write_atomic(&dir, OUTPUT_FILE, output)?;
        info!("Stored resolution result in {}", dir.display());
        Ok(())
    }
}

fn write_atomic(dir: &Path, name: &str, contents: &str) -> Result<()> {
    let mut file = tempfile::NamedTempFile::new_in(dir).map_err(|e| ArchiveError::io(dir, e))?;
    file.write_all(contents.as_bytes()).map_err(|e| ArchiveError::io(file.path(), e))?;
    let target = dir.join(name);
    file.persist(&target).map_err(|e| ArchiveError::io(&target, e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_miss_then_hit() {
        let temp = TempDir::new().unwrap();
        let cache = ResolutionCache::new(temp.path());

        assert!(cache.lookup("piptools", "3.6", "flask\n").unwrap().is_none());
        cache.store("piptools", "3.6", "flask\n", "flask==1.0 --hash=sha256:aa\n").unwrap();
        assert_eq!(
            cache.lookup("piptools", "3.6", "flask\n").unwrap().as_deref(),
            Some("flask==1.0 --hash=sha256:aa\n")
        );
    }

    #[test]
    fn test_layout() {
        let temp = TempDir::new().unwrap();
        let cache = ResolutionCache::new(temp.path());
        cache.store("piptools", "3.6", "flask\n", "out").unwrap();

        let dir = temp.path().join(format!("piptools-3.6-{}", content_digest("flask\n")));
        assert_eq!(std::fs::read_to_string(dir.join("input.txt")).unwrap(), "flask\n");
        assert_eq!(std::fs::read_to_string(dir.join("output.txt")).unwrap(), "out");
        // No temporary files left behind.
        assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 2);
    }

    #[test]
    fn test_keys_separate_tool_and_version() {
        let temp = TempDir::new().unwrap();
        let cache = ResolutionCache::new(temp.path());
        cache.store("piptools", "3.6", "flask\n", "old").unwrap();

        assert!(cache.lookup("piptools", "3.8", "flask\n").unwrap().is_none());
        assert!(cache.lookup("micropipenv", "3.6", "flask\n").unwrap().is_none());
    }

    #[test]
    fn test_rewrite_same_key_last_wins() {
        let temp = TempDir::new().unwrap();
        let cache = ResolutionCache::new(temp.path());
        cache.store("piptools", "3.6", "x", "first").unwrap();
        cache.store("piptools", "3.6", "x", "second").unwrap();
        assert_eq!(cache.lookup("piptools", "3.6", "x").unwrap().as_deref(), Some("second"));
    }
}
