//! Container runtime backed by the `podman` or `docker` command-line tool.

use super::{BuildSpec, ContainerRuntime, Mount, MountMode, RunOutput, RunSpec};
use crate::error::{ArchiveError, Result};
use crate::process::{run_logged, CommandSpec};
use async_trait::async_trait;
use tracing::{debug, instrument};

/// Which CLI dialect the tool speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolFlavor {
    Podman,
    Docker,
}

impl ToolFlavor {
    /// Guess the dialect from the program name.
    pub fn detect(program: &str) -> Self {
        let name = std::path::Path::new(program)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(program);
        if name.contains("docker") {
            ToolFlavor::Docker
        } else {
            ToolFlavor::Podman
        }
    }

    /// Volume options for a mount mode.
    ///
    /// Docker has no overlay, idmap or relabel options; it gets the closest
    /// plain read-only/read-write equivalent.
    pub fn mount_options(self, mode: MountMode) -> &'static str {
        match (self, mode) {
            (ToolFlavor::Podman, MountMode::Overlay) => "O",
            (ToolFlavor::Podman, MountMode::Private) => "Z",
            (ToolFlavor::Podman, MountMode::SharedCache) => "rw,U,Z",
            (ToolFlavor::Docker, MountMode::Overlay) => "ro",
            (ToolFlavor::Docker, MountMode::Private | MountMode::SharedCache) => "rw",
        }
    }
}

/// Runtime that shells out to a container CLI.
#[derive(Debug, Clone)]
pub struct CliRuntime {
    program: String,
    flavor: ToolFlavor,
}

impl CliRuntime {
    /// Create a runtime for `program` (e.g. `podman`, `/usr/bin/docker`).
    pub fn new(program: impl Into<String>) -> Self {
        let program = program.into();
        let flavor = ToolFlavor::detect(&program);
        Self { program, flavor }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn flavor(&self) -> ToolFlavor {
        self.flavor
    }

    /// `-v host:target:opts` argument for a mount.
    pub fn volume_arg(&self, mount: &Mount) -> String {
        format!(
            "{}:{}:{}",
            mount.host.display(),
            mount.target,
            self.flavor.mount_options(mount.mode)
        )
    }

    fn command(&self) -> CommandSpec {
        CommandSpec::new(&self.program)
    }

    fn build_command(&self, spec: &BuildSpec) -> CommandSpec {
        let mut command = self
            .command()
            .arg("build")
            .arg(spec.context_dir.display().to_string());
        if self.flavor == ToolFlavor::Podman {
            command = command.arg("--layers");
            for mount in &spec.mounts {
                command = command.arg("-v").arg(self.volume_arg(mount));
            }
        } else if !spec.mounts.is_empty() {
            debug!(count = spec.mounts.len(), "docker build does not support volumes; skipping");
        }
        command = command.args(spec.extra_args.iter().cloned());
        match &spec.tag {
            Some(tag) => command.arg("-t").arg(tag),
            None => command.arg("-q").capture_stdout(),
        }
    }

    fn run_command(&self, spec: &RunSpec) -> CommandSpec {
        let mut command = self.command().arg("run").arg("--rm");
        if spec.stdin.is_some() {
            command = command.arg("-i");
        }
        for mount in &spec.mounts {
            command = command.arg("-v").arg(self.volume_arg(mount));
        }
        command = command.arg(&spec.image).args(spec.command.iter().cloned());
        if spec.capture_stdout {
            command = command.capture_stdout();
        }
        if let Some(input) = &spec.stdin {
            command = command.stdin(input.clone());
        }
        command
    }
}

#[async_trait]
impl ContainerRuntime for CliRuntime {
    #[instrument(skip(self))]
    async fn image_exists(&self, name: &str) -> Result<bool> {
        let command = match self.flavor {
            ToolFlavor::Podman => self.command().args(["image", "exists", name]),
            ToolFlavor::Docker => self
                .command()
                .args(["image", "inspect", "--format", "{{.Id}}", name])
                .capture_stdout(),
        };
        Ok(run_logged(&command).await?.success())
    }

    #[instrument(skip(self, spec), fields(tag = ?spec.tag))]
    async fn build(&self, spec: &BuildSpec) -> Result<String> {
        let command = self.build_command(spec);
        let output = run_logged(&command).await?;
        let image = spec.tag.clone().unwrap_or_else(|| "<unnamed>".to_string());
        if !output.success() {
            return Err(ArchiveError::BuildFailed { image, code: output.code });
        }
        match &spec.tag {
            Some(tag) => Ok(tag.clone()),
            None => output
                .stdout_text()
                .lines()
                .rev()
                .map(str::trim)
                .find(|line| !line.is_empty())
                .map(str::to_string)
                .ok_or_else(|| ArchiveError::BuildFailed { image, code: output.code }),
        }
    }

    #[instrument(skip(self, spec), fields(image = %spec.image))]
    async fn run(&self, spec: &RunSpec) -> Result<RunOutput> {
        let output = run_logged(&self.run_command(spec)).await?;
        Ok(RunOutput { code: output.code, stdout: output.stdout })
    }
}
