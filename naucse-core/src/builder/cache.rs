//! Image cache for the archiver.
//!
//! Images are looked up by name in the container runtime's own store. A name
//! is derived from the inputs of the stage that produces it, so an existing
//! name means the recipe has already been built and is skipped.

use crate::builder::recipe::Recipe;
use crate::error::{ArchiveError, Result};
use crate::runtime::{BuildSpec, ContainerRuntime};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Ensures named images exist, building each at most once.
#[derive(Clone)]
pub struct ImageCache {
    runtime: Arc<dyn ContainerRuntime>,
}

impl ImageCache {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }

    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    /// Ensure an image called `name` exists.
    ///
    /// If the runtime already has it, `write_recipe` is never called.
    /// Otherwise the recipe is written into a temporary build context and
    /// built with `name` as its tag. The context is removed on every path.
    ///
    /// An unnamed (`None`) image is always built and the runtime-chosen ID
    /// is returned.
    #[instrument(skip(self, write_recipe))]
    pub async fn ensure<F>(&self, name: Option<&str>, write_recipe: F) -> Result<String>
    where
        F: FnOnce(&mut Recipe),
    {
        if let Some(name) = name {
            if self.runtime.image_exists(name).await? {
                debug!("Image already exists: {}", name);
                return Ok(name.to_string());
            }
        }

        let mut recipe = Recipe::new();
        write_recipe(&mut recipe);

        let context = tempfile::Builder::new()
            .prefix("naucse-build-")
            .tempdir()
            .map_err(|e| ArchiveError::io(std::env::temp_dir(), e))?;
        recipe.write_context(context.path())?;

        let spec = BuildSpec {
            context_dir: context.path().to_path_buf(),
            mounts: recipe.mounts().to_vec(),
            extra_args: recipe.extra_args().to_vec(),
            tag: name.map(str::to_string),
        };

        info!(
            "Building image {} ({} statements)",
            name.unwrap_or("<unnamed>"),
            recipe.statements().len()
        );
        let image = self.runtime.build(&spec).await?;
        drop(context);

        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::mock::MockRuntime;

    #[tokio::test]
    async fn test_ensure_builds_once() {
        let runtime = Arc::new(MockRuntime::new());
        let cache = ImageCache::new(runtime.clone());

        let first = cache
            .ensure(Some("localhost/naucse-py3.6"), |r| {
                r.statement("FROM fedora");
            })
            .await
            .unwrap();

        let mut called = false;
        let second = cache
            .ensure(Some("localhost/naucse-py3.6"), |r| {
                called = true;
                r.statement("FROM fedora");
            })
            .await
            .unwrap();

        assert_eq!(first, "localhost/naucse-py3.6");
        assert_eq!(first, second);
        assert!(!called, "recipe writer must not run for an existing image");
        assert_eq!(runtime.builds().len(), 1);
        assert!(!runtime.builds()[0].context_dir.exists());
    }

    #[tokio::test]
    async fn test_recipe_reaches_build_context() {
        let runtime = Arc::new(MockRuntime::new());
        let cache = ImageCache::new(runtime.clone());

        cache
            .ensure(Some("img"), |r| {
                r.statement("FROM base").statement("ADD a.txt /a.txt").file("a.txt", "hello");
            })
            .await
            .unwrap();

        let builds = runtime.builds();
        assert_eq!(builds[0].containerfile, "FROM base\nADD a.txt /a.txt\n");
        assert_eq!(builds[0].files["a.txt"], "hello");
    }

    #[tokio::test]
    async fn test_unnamed_build_returns_runtime_id() {
        let runtime = Arc::new(MockRuntime::new());
        let cache = ImageCache::new(runtime.clone());

        let from_base = |r: &mut Recipe| {
            r.statement("FROM base");
        };
        let first = cache.ensure(None, from_base).await.unwrap();
        let second = cache.ensure(None, from_base).await.unwrap();

        assert!(first.starts_with("sha256:"));
        assert_ne!(first, second);
        assert_eq!(runtime.builds().len(), 2);
    }

    #[tokio::test]
    async fn test_context_removed_after_failure() {
        let runtime = Arc::new(MockRuntime::failing_builds());
        let cache = ImageCache::new(runtime.clone());
        let result = cache
            .ensure(Some("broken"), |r| {
                r.statement("FROM nowhere");
            })
            .await;

        assert!(matches!(result, Err(ArchiveError::BuildFailed { .. })));
        assert!(!runtime.builds()[0].context_dir.exists());
        // A failed build leaves no tagged image behind.
        assert!(!runtime.image_exists("broken").await.unwrap());
    }
}
