//! Logged execution of external commands.
//!
//! Every container and Git invocation goes through [`run_logged`], which
//! logs the shell-quoted command line before it starts and the exit code
//! with elapsed time after it finishes.

use crate::error::{ArchiveError, Result};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

/// An external command to run.
#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    /// Capture stdout instead of streaming it to our stderr.
    pub capture_stdout: bool,
    /// Bytes fed to the child's stdin.
    pub stdin: Option<Vec<u8>>,
}

impl CommandSpec {
    /// Create a spec for `program` with no arguments.
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into(), ..Self::default() }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
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

    /// The command line, quoted for a POSIX shell.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(quote_word)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Exit code and (optionally) captured stdout of a finished command.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// `None` if the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: Vec<u8>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Captured stdout as text.
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Turn a non-zero exit into [`ArchiveError::CommandFailed`].
    pub fn check(self, spec: &CommandSpec) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(ArchiveError::CommandFailed { command: spec.display(), code: self.code })
        }
    }
}

/// Run a command to completion, logging it. A non-zero exit is not an error here.
pub async fn run_logged(spec: &CommandSpec) -> Result<CommandOutput> {
    info!("$ {}", spec.display());
    let start = Instant::now();

    let mut command = Command::new(&spec.program);
    command.args(&spec.args);
    if let Some(cwd) = &spec.cwd {
        command.current_dir(cwd);
    }
    for (key, value) in &spec.env {
        command.env(key, value);
    }
    command.stdin(if spec.stdin.is_some() { Stdio::piped() } else { Stdio::null() });
    // Streamed output goes to stderr; stdout is reserved for the run summary.
    command.stdout(if spec.capture_stdout {
        Stdio::piped()
    } else {
        Stdio::from(std::io::stderr())
    });
    command.stderr(Stdio::inherit());

    let mut child = command.spawn().map_err(|e| ArchiveError::SpawnFailed {
        program: spec.program.clone(),
        source: e,
    })?;

    if let Some(input) = &spec.stdin {
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input).await.map_err(|e| ArchiveError::SpawnFailed {
                program: spec.program.clone(),
                source: e,
            })?;
        }
    }

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| ArchiveError::SpawnFailed { program: spec.program.clone(), source: e })?;

    let code = output.status.code();
    info!(
        "{} -> {} ({:.2}s)",
        quote_word(&spec.program),
        code.map(|c| c.to_string()).unwrap_or_else(|| "signal".into()),
        start.elapsed().as_secs_f64()
    );
    debug!(captured = output.stdout.len(), "command finished");

    Ok(CommandOutput { code, stdout: output.stdout })
}

/// Run a command and fail on a non-zero exit.
pub async fn run_checked(spec: &CommandSpec) -> Result<CommandOutput> {
    run_logged(spec).await?.check(spec)
}

/// Quote a word of a shell command.
pub fn quote_word(word: &str) -> String {
    let plain = !word.is_empty()
        && word.chars().all(|c| c.is_ascii_alphanumeric() || "-_.=/:".contains(c));
    if plain {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}
