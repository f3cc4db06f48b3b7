//! naucse archiver core library
//!
//! Renders old naucse courses in reproducible container images and stores
//! the result as static files plus a `course.json`.

pub mod archive;
pub mod builder;
pub mod config;
pub mod course;
pub mod definitions;
pub mod error;
pub mod exec;
pub mod fixes;
pub mod hash;
pub mod observability;
pub mod paths;
pub mod process;
pub mod resolver;
pub mod runtime;
pub mod sandbox;
pub mod source;

// Re-export commonly used items
pub use archive::{ArchivedCourse, Archiver};
pub use config::Config;
pub use course::{ApiVersion, CourseInfo, Lesson};
pub use definitions::{find_definitions, CourseDefinition, CourseSource};
pub use error::{ArchiveError, Result};
pub use exec::{ExecutionBridge, RemoteCall};
pub use observability::init as init_observability;
pub use resolver::{ResourceFetcher, ResourceGraphResolver};
pub use runtime::{CliRuntime, ContainerRuntime};
pub use sandbox::OutputSandbox;
pub use source::{Clock, GitSource, SystemClock};
