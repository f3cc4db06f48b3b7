//! Image building for course rendering.
//!
//! This module provides build recipes, the name-keyed image cache, the
//! three-stage image derivation and the on-disk resolution cache.

pub mod cache;
pub mod pipeline;
pub mod recipe;
pub mod resolution;

pub use cache::ImageCache;
pub use pipeline::{
    choose_route, DependencyRoute, DependencySpec, ImagePipeline, ResolverTool, CONTAINER_AUX_DIR,
    CONTAINER_PIP_CACHE, CONTAINER_PYTHON, CONTAINER_WORKDIR,
};
pub use recipe::Recipe;
pub use resolution::ResolutionCache;
