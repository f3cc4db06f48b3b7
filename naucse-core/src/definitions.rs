//! Course definitions in the data directory.
//!
//! ```text
//! <data>/courses/<name>/link.yml
//! <data>/runs/<year>/<name>/link.yml
//! ```
//!
//! Each `link.yml` names the repository and branch a course is rendered
//! from. The slug is the directory relative to `courses` or `runs`.

use crate::error::{ArchiveError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Where the course sources live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseSource {
    pub repo: String,
    pub branch: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseDefinition {
    pub slug: String,
    pub source: CourseSource,
    /// The `link.yml` this definition was read from.
    pub path: PathBuf,
}

/// Definition locations, as (base directory, pattern below it).
const LAYOUTS: &[(&str, &str)] = &[("courses", "*/link.yml"), ("runs", "*/*/link.yml")];

/// Find definitions whose slug matches any of the shell-style `patterns`.
///
/// Courses come before runs; each group is in path order.
pub fn find_definitions(data_dir: &Path, patterns: &[String]) -> Result<Vec<CourseDefinition>> {
    let patterns = patterns
        .iter()
        .map(|p| {
            glob::Pattern::new(p).map_err(|e| ArchiveError::InvalidConfig {
                reason: format!("Bad course pattern {:?}: {}", p, e),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let mut found = Vec::new();
    for (base_name, layout) in LAYOUTS {
        let base = data_dir.join(base_name);
        let pattern = format!("{}/{}", glob::Pattern::escape(&base.to_string_lossy()), layout);
        let paths = glob::glob(&pattern).map_err(|e| ArchiveError::InvalidConfig {
            reason: format!("Bad search pattern {:?}: {}", pattern, e),
        })?;
        for entry in paths {
            let path = entry.map_err(|e| ArchiveError::io(e.path().to_path_buf(), e.into_error()))?;
            let slug = slug_for(&base, &path);
            if !patterns.iter().any(|p| p.matches(&slug)) {
                debug!("Skipping {}", slug);
                continue;
            }
            let source = read_source(&path)?;
            found.push(CourseDefinition { slug, source, path });
        }
    }
    Ok(found)
}

fn slug_for(base: &Path, link: &Path) -> String {
    let dir = link.parent().and_then(|p| p.strip_prefix(base).ok()).unwrap_or(Path::new(""));
    dir.components().map(|c| c.as_os_str().to_string_lossy()).collect::<Vec<_>>().join("/")
}

fn read_source(path: &Path) -> Result<CourseSource> {
    let text = std::fs::read_to_string(path).map_err(|e| ArchiveError::io(path, e))?;
    serde_yaml::from_str(&text).map_err(|e| ArchiveError::InvalidDefinition {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_link(data: &Path, dir: &str, repo: &str) {
        let dir = data.join(dir);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("link.yml"), format!("repo: {}\nbranch: main\n", repo)).unwrap();
    }

    fn all() -> Vec<String> {
        vec!["*".to_string()]
    }

    fn slugs(defs: &[CourseDefinition]) -> Vec<&str> {
        defs.iter().map(|d| d.slug.as_str()).collect()
    }

    #[test]
    fn test_finds_courses_and_runs() {
        let temp = TempDir::new().unwrap();
        write_link(temp.path(), "courses/pyladies", "https://github.com/a/pyladies");
        write_link(temp.path(), "runs/2019/mi-pyt", "https://github.com/b/mi-pyt");
        write_link(temp.path(), "runs/2018/pyladies-brno", "https://github.com/c/p");

        let defs = find_definitions(temp.path(), &all()).unwrap();
        assert_eq!(slugs(&defs), vec!["pyladies", "2018/pyladies-brno", "2019/mi-pyt"]);
        assert_eq!(defs[0].source.repo, "https://github.com/a/pyladies");
        assert_eq!(defs[0].source.branch, "main");
    }

    #[test]
    fn test_glob_selection() {
        let temp = TempDir::new().unwrap();
        write_link(temp.path(), "courses/pyladies", "r");
        write_link(temp.path(), "runs/2019/mi-pyt", "r");
        write_link(temp.path(), "runs/2019/pyladies-praha", "r");

        let defs = find_definitions(temp.path(), &["2019/*".to_string()]).unwrap();
        assert_eq!(slugs(&defs), vec!["2019/mi-pyt", "2019/pyladies-praha"]);

        let defs = find_definitions(temp.path(), &["*pyladies*".to_string()]).unwrap();
        assert_eq!(slugs(&defs), vec!["pyladies", "2019/pyladies-praha"]);
    }

    #[test]
    fn test_ignores_wrong_depth() {
        let temp = TempDir::new().unwrap();
        write_link(temp.path(), "courses/a/b", "r");
        write_link(temp.path(), "runs/2019", "r");
        assert!(find_definitions(temp.path(), &all()).unwrap().is_empty());
    }

    #[test]
    fn test_missing_directories() {
        let temp = TempDir::new().unwrap();
        assert!(find_definitions(temp.path(), &all()).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_yaml() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("courses/broken");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("link.yml"), "repo: [unterminated\n").unwrap();

        let err = find_definitions(temp.path(), &all()).unwrap_err();
        assert!(matches!(err, ArchiveError::InvalidDefinition { .. }));
    }

    #[test]
    fn test_missing_branch_is_invalid() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("courses/nobranch");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("link.yml"), "repo: https://example.com/x\n").unwrap();

        assert!(find_definitions(temp.path(), &all()).is_err());
    }
}
