//! CLI command implementations

pub mod archive;

pub use archive::archive;
