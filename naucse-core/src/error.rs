//! Error types for the archiver.
//!
//! All errors use `thiserror` for ergonomic error handling and proper error chains.
//! None of them is recovered inside the core: each one aborts the archival of
//! the current course.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for archiver operations.
pub type Result<T> = std::result::Result<T, ArchiveError>;

/// Main error type for the archiver.
#[derive(Error, Debug)]
pub enum ArchiveError {
    // Image errors
    #[error("Build of image {image} failed with exit code {code:?}")]
    BuildFailed { image: String, code: Option<i32> },

    #[error("No dependency listing (Pipfile.lock or requirements.txt) in {path:?}")]
    NoDependencyListing { path: PathBuf },

    // Remote call errors
    #[error("Remote call {call} exited with code {code:?}")]
    ExecutionFailed { call: String, code: Option<i32> },

    #[error("Protocol failure in remote call {call}: {reason}")]
    ProtocolFailure { call: String, reason: String },

    // Resource graph errors
    #[error("Lessons are linked too deeply: {pending} slug(s) unresolved after {rounds} rounds")]
    ResolutionTooDeep { rounds: usize, pending: usize },

    #[error("Invalid lesson slug {slug:?}")]
    InvalidSlug { slug: String },

    #[error("{path:?} already exists")]
    DuplicateDestination { path: PathBuf },

    // Security errors
    #[error("Path {fragment:?} escapes {base:?}")]
    ContainmentViolation { base: PathBuf, fragment: String },

    // Schema errors
    #[error(
        "API version {major}.{minor} is too new; use `python -m naucse_render compile` directly"
    )]
    UnsupportedApiVersion { major: u32, minor: u32 },

    #[error("Invalid course data: {reason}")]
    InvalidCourse { reason: String },

    #[error("Invalid course definition at {path:?}: {reason}")]
    InvalidDefinition { path: PathBuf, reason: String },

    // Process errors
    #[error("Command `{command}` failed with exit code {code:?}")]
    CommandFailed { command: String, code: Option<i32> },

    #[error("Failed to spawn `{program}`: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    // Configuration errors
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    // File system errors
    #[error("I/O error at {path:?}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ArchiveError {
    /// Wrap an I/O error together with the path it happened at.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::IoError { path: path.into(), source }
    }

    /// True for errors caused by untrusted data trying to leave its sandbox.
    pub fn is_security_violation(&self) -> bool {
        matches!(self, Self::ContainmentViolation { .. } | Self::InvalidSlug { .. })
    }
}
