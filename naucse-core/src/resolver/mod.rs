//! Resolution of the lessons a course needs.
//!
//! A course lists lessons in its sessions, but lessons can link to further
//! lessons. The resolver fetches the whole frontier in one remote call per
//! round, writes the rendered content out, scans it for links and repeats
//! until nothing new turns up.
//!
//! # Round
//!
//! ```text
//! frontier ──fetch──► lessons ──write──► lessons/<slug>/...
//!    ▲                   │
//!    └──── links − resolved ◄─┘
//! ```
//!
//! The number of rounds is capped; a reference graph that keeps growing
//! fails with [`ArchiveError::ResolutionTooDeep`].

mod links;

pub use links::LinkScheme;

use crate::config::DEFAULT_MAX_RESOLUTION_ROUNDS;
use crate::course::{Content, Lesson};
use crate::error::{ArchiveError, Result};
use crate::exec::ExecutionBridge;
use crate::sandbox::{contained_join, OutputSandbox};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

static UNSAFE_NAME_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-z0-9./_-]+").expect("valid regex"));

/// Source of lesson batches.
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    async fn fetch(&self, slugs: &BTreeSet<String>) -> Result<BTreeMap<String, Lesson>>;
}

/// Fetches lessons through `get_lessons` in the course image.
pub struct BridgeFetcher<'a> {
    bridge: &'a ExecutionBridge,
    vars: Value,
}

impl<'a> BridgeFetcher<'a> {
    pub fn new(bridge: &'a ExecutionBridge, vars: Value) -> Self {
        Self { bridge, vars }
    }
}

#[async_trait]
impl ResourceFetcher for BridgeFetcher<'_> {
    async fn fetch(&self, slugs: &BTreeSet<String>) -> Result<BTreeMap<String, Lesson>> {
        self.bridge.fetch_resources(slugs, &self.vars).await
    }
}

/// Reject slugs that could name anything but a single directory.
pub fn validate_slug(slug: &str) -> Result<()> {
    if slug.is_empty() || slug.contains(&['/', '\\', '.'][..]) {
        return Err(ArchiveError::InvalidSlug { slug: slug.to_string() });
    }
    Ok(())
}

/// File name for an archived static file.
pub fn sanitize_static_name(name: &str) -> String {
    UNSAFE_NAME_CHARS.replace_all(&name.to_lowercase(), "-").into_owned()
}

/// Expands a set of lesson slugs to its transitive closure and writes the
/// lessons below the sandbox root.
pub struct ResourceGraphResolver {
    sandbox: OutputSandbox,
    source_root: PathBuf,
    max_rounds: usize,
    links: LinkScheme,
}

impl ResourceGraphResolver {
    /// `source_root` is the course worktree static files are copied from.
    pub fn new(sandbox: OutputSandbox, source_root: impl Into<PathBuf>) -> Self {
        Self {
            sandbox,
            source_root: source_root.into(),
            max_rounds: DEFAULT_MAX_RESOLUTION_ROUNDS,
            links: LinkScheme::default(),
        }
    }

    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    /// Resolve `initial` and everything it links to.
    ///
    /// Returned lessons have their content replaced by paths relative to the
    /// sandbox root.
    #[instrument(skip_all, fields(initial = initial.len(), max_rounds = self.max_rounds))]
    pub async fn resolve(
        &self,
        fetcher: &dyn ResourceFetcher,
        initial: BTreeSet<String>,
    ) -> Result<BTreeMap<String, Lesson>> {
        let mut frontier = initial;
        let mut resolved: BTreeMap<String, Lesson> = BTreeMap::new();
        let mut round = 0;

        while !frontier.is_empty() {
            if round >= self.max_rounds {
                return Err(ArchiveError::ResolutionTooDeep {
                    rounds: round,
                    pending: frontier.len(),
                });
            }
            for slug in &frontier {
                validate_slug(slug)?;
            }

            info!(round, pending = frontier.len(), "Fetching lessons");
            let batch = fetcher.fetch(&frontier).await?;
            let mut discovered = BTreeSet::new();
            for (slug, mut lesson) in batch {
                validate_slug(&slug)?;
                self.store_lesson(&slug, &mut lesson, &mut discovered)?;
                resolved.insert(slug, lesson);
            }

            for slug in &frontier {
                if !resolved.contains_key(slug) {
                    warn!("Lesson {} was requested but not returned", slug);
                }
            }
            frontier.extend(discovered);
            frontier.retain(|slug| !resolved.contains_key(slug));
            round += 1;
        }

        info!(lessons = resolved.len(), rounds = round, "Lessons resolved");
        Ok(resolved)
    }

    fn store_lesson(
        &self,
        slug: &str,
        lesson: &mut Lesson,
        discovered: &mut BTreeSet<String>,
    ) -> Result<()> {
        let lessons_dir = self.sandbox.resolve("lessons")?;
        std::fs::create_dir_all(&lessons_dir).map_err(|e| ArchiveError::io(&lessons_dir, e))?;
        let lesson_dir = self.sandbox.resolve_in(&lessons_dir, &slug.to_lowercase())?;
        if lesson_dir.exists() {
            return Err(ArchiveError::DuplicateDestination { path: lesson_dir });
        }
        std::fs::create_dir_all(&lesson_dir).map_err(|e| ArchiveError::io(&lesson_dir, e))?;
        debug!("Writing lesson {} to {}", slug, lesson_dir.display());

        let mut solution_index = 0;
        for (name, page) in lesson.pages.iter_mut() {
            let file_name = format!("{}.html", name);
            self.store_content(&lesson_dir, &file_name, &mut page.content, discovered)?;
            for solution in page.solutions.iter_mut().flatten() {
                let file_name = format!("solution-{}.html", solution_index);
                self.store_content(&lesson_dir, &file_name, &mut solution.content, discovered)?;
                solution_index += 1;
            }
        }

        if !lesson.static_files.is_empty() {
            let static_dir = lesson_dir.join("static");
            std::fs::create_dir_all(&static_dir).map_err(|e| ArchiveError::io(&static_dir, e))?;
            for (name, file) in lesson.static_files.iter_mut() {
                let source = contained_join(&self.source_root, &file.path)?;
                let dest = self.sandbox.prepare_file(&static_dir, &sanitize_static_name(name))?;
                if dest.symlink_metadata().is_ok() {
                    return Err(ArchiveError::DuplicateDestination { path: dest });
                }
                std::fs::copy(&source, &dest).map_err(|e| ArchiveError::io(&source, e))?;
                file.path = self.sandbox.relative(&dest)?;
            }
        }
        Ok(())
    }

    /// Write inline content to `file_name` and point `content` at it.
    fn store_content(
        &self,
        dir: &Path,
        file_name: &str,
        content: &mut Content,
        discovered: &mut BTreeSet<String>,
    ) -> Result<()> {
        let Content::Inline(html) = content else {
            return Err(ArchiveError::InvalidCourse {
                reason: format!("content for {} is not inline HTML", file_name),
            });
        };
        discovered.extend(self.links.find_lesson_slugs(html));

        let path = self.sandbox.prepare_file(dir, file_name)?;
        let mut file = match std::fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(ArchiveError::DuplicateDestination { path });
            }
            Err(e) => return Err(ArchiveError::io(path, e)),
        };
        file.write_all(html.as_bytes()).map_err(|e| ArchiveError::io(&path, e))?;

        *content = Content::Stored { path: self.sandbox.relative(&path)? };
        Ok(())
    }
}
