//! Archival of one course, end to end.
//!
//! ```text
//! fetch ─► commit id ─► worktree ─► image ─► env-info + course.json ─► promote
//! ```
//!
//! Everything is written to a temporary result directory first. Only a
//! fully archived course replaces `<output>/<slug>`.

use crate::builder::{ImagePipeline, ResolutionCache, CONTAINER_PYTHON};
use crate::config::Config;
use crate::definitions::CourseDefinition;
use crate::error::{ArchiveError, Result};
use crate::exec::ExecutionBridge;
use crate::resolver::{BridgeFetcher, ResourceGraphResolver};
use crate::runtime::{ContainerRuntime, RunSpec};
use crate::sandbox::OutputSandbox;
use crate::source::{branch_ref, Clock, GitSource};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Stand-in for the published URL, filled in by hand when the archive is deployed.
pub const URL_PLACEHOLDER: &str = "<url here>";

/// Branch the archived course is published from.
pub const ARCHIVE_BRANCH: &str = "main";

/// Summary entry for an archived course.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchivedCourse {
    /// Location relative to the output directory.
    pub path: String,
    pub url: String,
    pub branch: String,
}

impl ArchivedCourse {
    fn new(slug: &str) -> Self {
        Self {
            path: slug.to_string(),
            url: URL_PLACEHOLDER.to_string(),
            branch: ARCHIVE_BRANCH.to_string(),
        }
    }
}

/// Commands whose output is kept in `env-info/`, as (file name, command).
const ENV_INFO_COMMANDS: &[(&str, &[&str])] = &[
    ("os-release", &["cat", "/etc/os-release"]),
    ("dnf.txt", &["dnf", "list", "installed"]),
    ("pip.txt", &[CONTAINER_PYTHON, "-m", "pip", "freeze", "--all"]),
];

pub struct Archiver {
    config: Config,
    runtime: Arc<dyn ContainerRuntime>,
    pipeline: ImagePipeline,
    source: GitSource,
}

impl Archiver {
    pub fn new(config: Config, runtime: Arc<dyn ContainerRuntime>, clock: Arc<dyn Clock>) -> Self {
        let pipeline = ImagePipeline::new(
            runtime.clone(),
            ResolutionCache::new(&config.cache_dir),
            config.pip_cache_dir(),
            config.image_prefix.clone(),
            config.default_python_version.clone(),
        );
        let source = GitSource::new(&config.data_dir, clock)
            .with_refetch_interval(config.refetch_interval())
            .with_fetch_depth(config.fetch_depth);
        Self { config, runtime, pipeline, source }
    }

    /// Fetch, check out and archive one course.
    ///
    /// The worktree is removed whether or not archiving succeeded.
    #[instrument(skip_all, fields(course = %definition.slug))]
    pub async fn archive(&self, definition: &CourseDefinition) -> Result<ArchivedCourse> {
        let remote = self.source.fetch(&definition.source.repo).await?;
        let reference = branch_ref(&remote, &definition.source.branch);
        let commit_id = self.source.commit_id(&reference).await?;
        let worktree = self.source.add_worktree(&reference).await?;

        let archived = self.archive_checkout(definition, &commit_id, worktree.path()).await;
        let removed = worktree.remove().await;
        let archived = archived?;
        removed?;
        Ok(archived)
    }

    /// Archive a course already checked out at `worktree`.
    #[instrument(skip_all, fields(course = %definition.slug, commit = %commit_id))]
    pub async fn archive_checkout(
        &self,
        definition: &CourseDefinition,
        commit_id: &str,
        worktree: &Path,
    ) -> Result<ArchivedCourse> {
        let image = self.pipeline.image_for_worktree(worktree).await?;
        info!("Rendering {} in {}", definition.slug, image);

        let result = tempfile::Builder::new()
            .prefix("naucse-result-")
            .tempdir()
            .map_err(|e| ArchiveError::io(std::env::temp_dir(), e))?;
        self.save_env_info(&image, &definition.slug, commit_id, result.path()).await?;
        self.save_course(definition, commit_id, &image, worktree, result.path()).await?;
        self.promote(&definition.slug, result.path())?;

        info!("Archived {}", definition.slug);
        Ok(ArchivedCourse::new(&definition.slug))
    }

    /// Record what the course was rendered with.
    async fn save_env_info(
        &self,
        image: &str,
        slug: &str,
        commit_id: &str,
        result: &Path,
    ) -> Result<()> {
        let dir = result.join("env-info");
        std::fs::create_dir(&dir).map_err(|e| ArchiveError::io(&dir, e))?;
        for (file_name, command) in ENV_INFO_COMMANDS {
            let spec = RunSpec::new(image).command(command.iter().copied()).capture_stdout();
            let output = self.runtime.run(&spec).await?;
            if !output.success() {
                return Err(ArchiveError::CommandFailed {
                    command: command.join(" "),
                    code: output.code,
                });
            }
            write(&dir.join(file_name), &output.stdout)?;
        }
        write(&dir.join("source-commit.txt"), format!("{}\n", commit_id).as_bytes())?;
        write(&dir.join("course.txt"), format!("{}\n", slug).as_bytes())?;
        Ok(())
    }

    /// Render the course and its lessons into `result`.
    async fn save_course(
        &self,
        definition: &CourseDefinition,
        commit_id: &str,
        image: &str,
        worktree: &Path,
        result: &Path,
    ) -> Result<()> {
        let bridge = ExecutionBridge::new(self.runtime.clone(), image, worktree);
        let mut info = bridge.describe_course(&definition.slug).await?;
        info.normalize(commit_id, &self.config.default_timezone)?;

        let fetcher = BridgeFetcher::new(&bridge, info.vars());
        let resolver = ResourceGraphResolver::new(OutputSandbox::new(result)?, worktree)
            .with_max_rounds(self.config.max_resolution_rounds);
        let lessons = resolver.resolve(&fetcher, info.lesson_slugs()).await?;
        info.set_lessons(lessons)?;
        info.set_default_edit_info(&definition.source.repo, &definition.source.branch);

        info.write_json(&result.join("course.json"))
    }

    /// Replace `<output>/<slug>` with the finished result.
    ///
    /// The result is copied into a staging directory next to the destination
    /// and renamed into place, so `<output>/<slug>` holds either the previous
    /// archive or the complete new one. The previous archive is deleted only
    /// after the new one is in place.
    fn promote(&self, slug: &str, result: &Path) -> Result<()> {
        let output = OutputSandbox::new(&self.config.output_dir)?;
        let dest = output.resolve(slug)?;
        let parent = dest.parent().unwrap_or(output.root());
        std::fs::create_dir_all(parent).map_err(|e| ArchiveError::io(parent, e))?;

        let staging = tempfile::Builder::new()
            .prefix(".naucse-staging-")
            .tempdir_in(parent)
            .map_err(|e| ArchiveError::io(parent, e))?;
        let staged = staging.path().join("new");
        let previous = staging.path().join("previous");
        copy_dir(result, &staged)?;

        let had_previous = dest.exists();
        if had_previous {
            std::fs::rename(&dest, &previous).map_err(|e| ArchiveError::io(&dest, e))?;
        }
        if let Err(e) = std::fs::rename(&staged, &dest) {
            if had_previous {
                if let Err(restore) = std::fs::rename(&previous, &dest) {
                    warn!("Failed to restore {}: {}", dest.display(), restore);
                }
            }
            return Err(ArchiveError::io(&dest, e));
        }

        if let Err(e) = staging.close() {
            warn!("Failed to remove the previous archive of {}: {}", slug, e);
        }
        info!("Wrote {}", dest.display());
        Ok(())
    }
}

fn write(path: &Path, contents: &[u8]) -> Result<()> {
    std::fs::write(path, contents).map_err(|e| ArchiveError::io(path, e))
}

fn copy_dir(src: &Path, dest: &Path) -> Result<()> {
    std::fs::create_dir_all(dest).map_err(|e| ArchiveError::io(dest, e))?;
    for entry in std::fs::read_dir(src).map_err(|e| ArchiveError::io(src, e))? {
        let entry = entry.map_err(|e| ArchiveError::io(src, e))?;
        let target = dest.join(entry.file_name());
        let file_type = entry.file_type().map_err(|e| ArchiveError::io(entry.path(), e))?;
        if file_type.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target).map_err(|e| ArchiveError::io(entry.path(), e))?;
        }
    }
    Ok(())
}
