//! Image derivation for course rendering.
//!
//! Every course gets an image built in three cached stages:
//!
//! ```text
//! <prefix>-py<ver>                 runtime base: Python + venv
//!   ├── <prefix>-py<ver>-<tool>    toolchain: micropipenv or pip-tools
//!   └── <prefix>-py<ver>-<hash>    dependencies: pinned listing installed
//! ```
//!
//! The dependency stage is named by the digest of the pinned listing, so two
//! courses pinning byte-identical dependencies share one image.

use crate::builder::cache::ImageCache;
use crate::builder::resolution::ResolutionCache;
use crate::error::{ArchiveError, Result};
use crate::fixes::{self, PREREQUISITE_RULES, REQUIREMENT_FIXES};
use crate::hash::content_digest;
use crate::runtime::{ContainerRuntime, Mount, MountMode, RunSpec};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Python interpreter inside the venv of every image.
pub const CONTAINER_PYTHON: &str = "/naucse/env/bin/python";

/// Where the course worktree is mounted.
pub const CONTAINER_WORKDIR: &str = "/naucse/wd";

/// Where auxiliary files (remote-call exchange) are mounted.
pub const CONTAINER_AUX_DIR: &str = "/naucse/aux";

/// Where the shared pip cache is mounted.
pub const CONTAINER_PIP_CACHE: &str = "/naucse/pip-cache";

const LOCKFILE: &str = "Pipfile.lock";
const REQUIREMENTS: &str = "requirements.txt";
const FIXED_REQUIREMENTS: &str = "requirements-fixed.txt";

static PYTHON_VERSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9]+(\.[0-9]+){0,2}$").expect("Invalid Python version regex"));

/// Tool that turns a course's dependency declaration into a pinned listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolverTool {
    /// Reads `Pipfile.lock`.
    Micropipenv,
    /// Compiles `requirements.txt` with hashes.
    PipTools,
}

impl ResolverTool {
    /// Short name used in image names and cache keys.
    pub fn name(self) -> &'static str {
        match self {
            ResolverTool::Micropipenv => "micropipenv",
            ResolverTool::PipTools => "piptools",
        }
    }

    /// Package installed into the toolchain image.
    pub fn package(self) -> &'static str {
        match self {
            ResolverTool::Micropipenv => "micropipenv",
            ResolverTool::PipTools => "pip-tools",
        }
    }
}

/// How a course declares its dependencies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyRoute {
    /// `Pipfile.lock`, which also names the Python version.
    Lockfile { python_version: String },
    /// A flat `requirements.txt`, resolved on the default Python version.
    Requirements { python_version: String },
}

impl DependencyRoute {
    pub fn tool(&self) -> ResolverTool {
        match self {
            DependencyRoute::Lockfile { .. } => ResolverTool::Micropipenv,
            DependencyRoute::Requirements { .. } => ResolverTool::PipTools,
        }
    }

    pub fn python_version(&self) -> &str {
        match self {
            DependencyRoute::Lockfile { python_version }
            | DependencyRoute::Requirements { python_version } => python_version,
        }
    }
}

/// A pinned dependency listing for one Python version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencySpec {
    pub python_version: String,
    pub listing: String,
}

impl DependencySpec {
    pub fn new(python_version: impl Into<String>, listing: impl Into<String>) -> Self {
        Self { python_version: python_version.into(), listing: listing.into() }
    }

    /// Name of the dependency-stage image: a pure function of version and listing bytes.
    pub fn image_name(&self, prefix: &str) -> String {
        format!("{}-py{}-{}", prefix, self.python_version, content_digest(&self.listing))
    }
}

/// Pick the dependency route for a worktree.
pub fn choose_route(worktree: &Path, default_python: &str) -> Result<DependencyRoute> {
    let lockfile = worktree.join(LOCKFILE);
    if lockfile.exists() {
        let text = std::fs::read_to_string(&lockfile).map_err(|e| ArchiveError::io(&lockfile, e))?;
        let data: serde_json::Value =
            serde_json::from_str(&text).map_err(|e| ArchiveError::InvalidCourse {
                reason: format!("Failed to parse {}: {}", LOCKFILE, e),
            })?;
        // Old lockfiles have no version; they predate newer Pythons anyway.
        let python_version = match &data["_meta"]["requires"]["python_version"] {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Number(n) => n.to_string(),
            _ => default_python.to_string(),
        };
        validate_python_version(&python_version)?;
        return Ok(DependencyRoute::Lockfile { python_version });
    }
    if worktree.join(REQUIREMENTS).exists() {
        validate_python_version(default_python)?;
        return Ok(DependencyRoute::Requirements { python_version: default_python.to_string() });
    }
    Err(ArchiveError::NoDependencyListing { path: worktree.to_path_buf() })
}

/// The version ends up in image names and shell commands; only digits and dots pass.
pub fn validate_python_version(version: &str) -> Result<()> {
    if PYTHON_VERSION.is_match(version) {
        Ok(())
    } else {
        Err(ArchiveError::InvalidCourse { reason: format!("Invalid Python version {:?}", version) })
    }
}

/// Builds the image a course is rendered in.
#[derive(Clone)]
pub struct ImagePipeline {
    cache: ImageCache,
    resolution: ResolutionCache,
    pip_cache: PathBuf,
    prefix: String,
    default_python: String,
}

impl ImagePipeline {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        resolution: ResolutionCache,
        pip_cache: impl Into<PathBuf>,
        prefix: impl Into<String>,
        default_python: impl Into<String>,
    ) -> Self {
        Self {
            cache: ImageCache::new(runtime),
            resolution,
            pip_cache: pip_cache.into(),
            prefix: prefix.into(),
            default_python: default_python.into(),
        }
    }

    fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        self.cache.runtime()
    }

    fn pip_cache_mount(&self) -> Mount {
        Mount::new(&self.pip_cache, CONTAINER_PIP_CACHE, MountMode::SharedCache)
    }

    /// Derive (building as needed) the final image for a worktree.
    #[instrument(skip(self))]
    pub async fn image_for_worktree(&self, worktree: &Path) -> Result<String> {
        std::fs::create_dir_all(&self.pip_cache).map_err(|e| ArchiveError::io(&self.pip_cache, e))?;
        let route = choose_route(worktree, &self.default_python)?;
        info!("Dependency route: {} on Python {}", route.tool().name(), route.python_version());

        let listing = match &route {
            DependencyRoute::Lockfile { python_version } => {
                self.listing_from_lockfile(worktree, python_version).await?
            }
            DependencyRoute::Requirements { python_version } => {
                self.listing_from_requirements(worktree, python_version).await?
            }
        };
        self.dependency_image(&DependencySpec::new(route.python_version(), listing)).await
    }

    /// Stage 1: the Python runtime and an empty venv.
    pub async fn base_image(&self, python_version: &str) -> Result<String> {
        let name = format!("{}-py{}", self.prefix, python_version);
        self.cache
            .ensure(Some(&name), |r| {
                r.statement("FROM fedora")
                    .statement(format!(
                        concat!(
                            "RUN dnf install -y --setopt=install_weak_deps=False ",
                            "python{} python-pip-wheel && dnf clean all"
                        ),
                        python_version
                    ))
                    .statement(format!(
                        "RUN mkdir /naucse {} {}",
                        CONTAINER_WORKDIR, CONTAINER_AUX_DIR
                    ))
                    .statement(format!("RUN python{} -m venv /naucse/env", python_version))
                    .statement(format!("RUN {} -m pip install -U pip wheel", CONTAINER_PYTHON))
                    .statement(format!("ENV PIP_CACHE_DIR {}", CONTAINER_PIP_CACHE))
                    .statement(format!("WORKDIR {}", CONTAINER_WORKDIR));
            })
            .await
    }

    /// Stage 2: the base plus a dependency-resolution tool.
    pub async fn toolchain_image(
        &self,
        python_version: &str,
        tool: ResolverTool,
    ) -> Result<String> {
        let base = self.base_image(python_version).await?;
        let name = format!("{}-py{}-{}", self.prefix, python_version, tool.name());
        let mount = self.pip_cache_mount();
        self.cache
            .ensure(Some(&name), |r| {
                r.statement(format!("FROM {}", base))
                    .statement(format!(
                        "RUN {} -m pip install {}",
                        CONTAINER_PYTHON,
                        tool.package()
                    ))
                    .mount(mount);
            })
            .await
    }

    /// Stage 3: the base plus the pinned dependencies.
    ///
    /// Pre-requisites found by the rule table are installed in their own step
    /// first; some legacy packages only build when they are already present.
    #[instrument(skip(self, spec), fields(python = %spec.python_version))]
    pub async fn dependency_image(&self, spec: &DependencySpec) -> Result<String> {
        let base = self.base_image(&spec.python_version).await?;
        let name = spec.image_name(&self.prefix);
        let prerequisites = fixes::find_prerequisites(&spec.listing, PREREQUISITE_RULES);
        let mount = self.pip_cache_mount();
        self.cache
            .ensure(Some(&name), |r| {
                r.file("requirements.txt", spec.listing.as_bytes())
                    .file("requirements-pre.txt", prerequisites.as_bytes())
                    .statement(format!("FROM {}", base))
                    .statement("ADD requirements-pre.txt /naucse/requirements-pre.txt")
                    .statement(format!(
                        "RUN {} -m pip install -r /naucse/requirements-pre.txt",
                        CONTAINER_PYTHON
                    ))
                    .statement("ADD requirements.txt /naucse/requirements.txt")
                    .statement(format!(
                        "RUN {} -m pip install -r /naucse/requirements.txt",
                        CONTAINER_PYTHON
                    ))
                    .mount(mount);
            })
            .await
    }

    /// Pinned listing from `Pipfile.lock`, via a throwaway micropipenv run.
    async fn listing_from_lockfile(&self, worktree: &Path, python_version: &str) -> Result<String> {
        let image = self.toolchain_image(python_version, ResolverTool::Micropipenv).await?;
        let spec = RunSpec::new(image)
            .mount(Mount::new(worktree, CONTAINER_WORKDIR, MountMode::Overlay))
            .mount(self.pip_cache_mount())
            .command([CONTAINER_PYTHON, "-m", "micropipenv", "requirements", "--no-dev"])
            .capture_stdout();
        let output = self.runtime().run(&spec).await?;
        if !output.success() {
            return Err(ArchiveError::CommandFailed {
                command: "micropipenv requirements --no-dev".into(),
                code: output.code,
            });
        }
        Ok(output.stdout_text())
    }

    /// Pinned listing from `requirements.txt`, via pip-tools (cached on disk).
    async fn listing_from_requirements(
        &self,
        worktree: &Path,
        python_version: &str,
    ) -> Result<String> {
        let requirements_path = worktree.join(REQUIREMENTS);
        let requirements = std::fs::read_to_string(&requirements_path)
            .map_err(|e| ArchiveError::io(&requirements_path, e))?;
        let fixed = fixes::fix_requirements(&requirements, REQUIREMENT_FIXES);
        info!("{}:\n{}", FIXED_REQUIREMENTS, indent(&fixed, "    "));

        let tool = ResolverTool::PipTools;
        if let Some(cached) = self.resolution.lookup(tool.name(), python_version, &fixed)? {
            return Ok(cached);
        }

        let image = self.toolchain_image(python_version, tool).await?;
        let fixed_path = worktree.join(FIXED_REQUIREMENTS);
        std::fs::write(&fixed_path, &fixed).map_err(|e| ArchiveError::io(&fixed_path, e))?;
        let spec = RunSpec::new(image)
            .mount(Mount::new(worktree, CONTAINER_WORKDIR, MountMode::Overlay))
            .mount(self.pip_cache_mount())
            .command([
                CONTAINER_PYTHON,
                "-m",
                "piptools",
                "compile",
                "--generate-hashes",
                "--output-file=-",
                FIXED_REQUIREMENTS,
            ])
            .capture_stdout()
            .stdin(fixed.as_bytes());
        let output = self.runtime().run(&spec).await;
        if let Err(e) = std::fs::remove_file(&fixed_path) {
            warn!("Failed to remove {}: {}", fixed_path.display(), e);
        }
        let output = output?;
        if !output.success() {
            return Err(ArchiveError::CommandFailed {
                command: format!("piptools compile {}", FIXED_REQUIREMENTS),
                code: output.code,
            });
        }

        let listing = output.stdout_text();
        self.resolution.store(tool.name(), python_version, &fixed, &listing)?;
        Ok(listing)
    }
}

fn indent(text: &str, prefix: &str) -> String {
    text.lines().map(|line| format!("{}{}", prefix, line)).collect::<Vec<_>>().join("\n")
}
