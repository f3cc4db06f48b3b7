//! Containment checks for paths built from course data.
//!
//! Slugs, page names and static-file paths come from the rendering code,
//! which is not trusted. Every such path is joined through [`contained_join`]
//! before anything is read or written, and a path that would leave its base
//! directory is a [`ArchiveError::ContainmentViolation`], never clamped.

use crate::error::{ArchiveError, Result};
use std::path::{Component, Path, PathBuf};

/// A canonicalized root directory that all output must stay inside.
#[derive(Debug, Clone)]
pub struct OutputSandbox {
    root: PathBuf,
}

impl OutputSandbox {
    /// Create `root` if needed and pin its canonical location.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        std::fs::create_dir_all(root).map_err(|e| ArchiveError::io(root, e))?;
        let root = std::fs::canonicalize(root).map_err(|e| ArchiveError::io(root, e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `fragment` below the root.
    pub fn resolve(&self, fragment: &str) -> Result<PathBuf> {
        contained_join(&self.root, fragment)
    }

    /// Resolve `fragment` below `base`, which must itself be inside the root.
    pub fn resolve_in(&self, base: &Path, fragment: &str) -> Result<PathBuf> {
        let canonical = std::fs::canonicalize(base).map_err(|e| ArchiveError::io(base, e))?;
        if !canonical.starts_with(&self.root) {
            return Err(violation(&self.root, &base.to_string_lossy()));
        }
        contained_join(&canonical, fragment)
    }

    /// Resolve `fragment` and create its parent directories.
    pub fn prepare_file(&self, base: &Path, fragment: &str) -> Result<PathBuf> {
        let path = self.resolve_in(base, fragment)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ArchiveError::io(parent, e))?;
        }
        Ok(path)
    }

    /// The part of `path` below the root, with `/` separators.
    pub fn relative(&self, path: &Path) -> Result<String> {
        let relative = path
            .strip_prefix(&self.root)
            .map_err(|_| violation(&self.root, &path.to_string_lossy()))?;
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Ok(parts.join("/"))
    }
}

/// Join `fragment` onto `base` the way the filesystem would resolve it.
///
/// `.` and `..` are applied in order and symlinks are followed as they are
/// met, like `realpath`. Components that do not exist yet are kept as
/// written. The result must be a strict descendant of the canonical `base`.
pub fn contained_join(base: &Path, fragment: &str) -> Result<PathBuf> {
    let base = std::fs::canonicalize(base).map_err(|e| ArchiveError::io(base, e))?;
    let mut current = base.clone();
    for component in Path::new(fragment).components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                current.pop();
            }
            Component::Normal(part) => {
                current.push(part);
                let is_symlink = current
                    .symlink_metadata()
                    .map(|m| m.file_type().is_symlink())
                    .unwrap_or(false);
                if is_symlink {
                    // A dangling link cannot be resolved, so its target is unknown.
                    current = std::fs::canonicalize(&current)
                        .map_err(|_| violation(&base, fragment))?;
                }
            }
            Component::RootDir | Component::Prefix(_) => return Err(violation(&base, fragment)),
        }
    }
    if current != base && current.starts_with(&base) {
        Ok(current)
    } else {
        Err(violation(&base, fragment))
    }
}

fn violation(base: &Path, fragment: &str) -> ArchiveError {
    ArchiveError::ContainmentViolation { base: base.to_path_buf(), fragment: fragment.to_string() }
}
