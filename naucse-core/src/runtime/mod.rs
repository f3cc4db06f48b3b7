//! Container runtime abstraction.
//!
//! The archiver drives a container CLI through the `ContainerRuntime` trait:
//! - `CliRuntime`: podman (primary) or docker, via their command-line tools
//! - tests: in-memory runtimes that record builds and answer remote calls

mod cli;
#[cfg(test)]
pub(crate) mod mock;

pub use cli::{CliRuntime, ToolFlavor};

use crate::error::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// How a host directory is mounted into a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountMode {
    /// Copy-on-write view; writes inside the container never reach the host.
    Overlay,
    /// Read-write, private to this container (SELinux relabel).
    Private,
    /// Read-write, shared across containers with ownership remapping (pip cache).
    SharedCache,
}

/// A host directory mounted into a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub host: PathBuf,
    pub target: String,
    pub mode: MountMode,
}

impl Mount {
    pub fn new(host: impl Into<PathBuf>, target: impl Into<String>, mode: MountMode) -> Self {
        Self { host: host.into(), target: target.into(), mode }
    }
}

/// A request to build an image from a prepared context directory.
#[derive(Debug, Clone)]
pub struct BuildSpec {
    /// Directory holding the `Containerfile` and auxiliary files.
    pub context_dir: PathBuf,
    /// Volumes mounted into `RUN` steps.
    pub mounts: Vec<Mount>,
    /// Extra arguments passed verbatim to the build command.
    pub extra_args: Vec<String>,
    /// Tag for the resulting image; `None` for an unnamed layer.
    pub tag: Option<String>,
}

/// A request to run a disposable container.
#[derive(Debug, Clone, Default)]
pub struct RunSpec {
    pub image: String,
    pub mounts: Vec<Mount>,
    pub command: Vec<String>,
    pub capture_stdout: bool,
    pub stdin: Option<Vec<u8>>,
}

impl RunSpec {
    pub fn new(image: impl Into<String>) -> Self {
        Self { image: image.into(), ..Self::default() }
    }

    pub fn mount(mut self, mount: Mount) -> Self {
        self.mounts.push(mount);
        self
    }

    pub fn command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command.extend(command.into_iter().map(Into::into));
        self
    }

    pub fn capture_stdout(mut self) -> Self {
        self.capture_stdout = true;
        self
    }

    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// The host path mounted at `target`, if any.
    pub fn host_path_for(&self, target: &str) -> Option<&Path> {
        self.mounts.iter().find(|m| m.target == target).map(|m| m.host.as_path())
    }
}

/// Outcome of a container run.
#[derive(Debug, Clone, Default)]
pub struct RunOutput {
    /// `None` if the container process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: Vec<u8>,
}

impl RunOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

/// Container runtime trait.
///
/// Implementations must be idempotent-safe: two archivers racing to build
/// the same image name both succeed and leave one usable image.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Check whether an image with this name is present in the local store.
    async fn image_exists(&self, name: &str) -> Result<bool>;

    /// Build an image. Returns the tag, or the runtime-chosen ID for unnamed builds.
    ///
    /// A failing build is `ArchiveError::BuildFailed`.
    async fn build(&self, spec: &BuildSpec) -> Result<String>;

    /// Run a disposable container (`--rm`) to completion.
    ///
    /// A non-zero exit is reported in `RunOutput::code`, not as an error.
    async fn run(&self, spec: &RunSpec) -> Result<RunOutput>;
}
