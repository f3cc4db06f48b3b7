//! Build recipes: the Containerfile statements plus everything placed
//! alongside it in the build context.

use crate::error::{ArchiveError, Result};
use crate::runtime::Mount;
use std::path::Path;

/// Ordered build statements, auxiliary files and extra build arguments.
#[derive(Debug, Clone, Default)]
pub struct Recipe {
    statements: Vec<String>,
    files: Vec<(String, Vec<u8>)>,
    mounts: Vec<Mount>,
    extra_args: Vec<String>,
}

impl Recipe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one Containerfile statement (`FROM ...`, `RUN ...`).
    pub fn statement(&mut self, statement: impl Into<String>) -> &mut Self {
        self.statements.push(statement.into());
        self
    }

    /// Place a file next to the Containerfile, for use by `ADD`.
    pub fn file(&mut self, name: impl Into<String>, contents: impl Into<Vec<u8>>) -> &mut Self {
        self.files.push((name.into(), contents.into()));
        self
    }

    /// Mount a host directory into `RUN` steps.
    pub fn mount(&mut self, mount: Mount) -> &mut Self {
        self.mounts.push(mount);
        self
    }

    /// Pass an extra argument to the build command.
    pub fn build_arg(&mut self, arg: impl Into<String>) -> &mut Self {
        self.extra_args.push(arg.into());
        self
    }

    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    pub fn mounts(&self) -> &[Mount] {
        &self.mounts
    }

    pub fn extra_args(&self) -> &[String] {
        &self.extra_args
    }

    /// Render the Containerfile text.
    pub fn containerfile(&self) -> String {
        let mut text = self.statements.join("\n");
        text.push('\n');
        text
    }

    /// Write the Containerfile and auxiliary files into `dir`.
    pub fn write_context(&self, dir: &Path) -> Result<()> {
        let containerfile = dir.join("Containerfile");
        std::fs::write(&containerfile, self.containerfile())
            .map_err(|e| ArchiveError::io(&containerfile, e))?;
        for (name, contents) in &self.files {
            if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
                return Err(ArchiveError::Internal(format!(
                    "Auxiliary build file name must be a plain file name: {:?}",
                    name
                )));
            }
            let path = dir.join(name);
            std::fs::write(&path, contents).map_err(|e| ArchiveError::io(&path, e))?;
        }
        Ok(())
    }
}
