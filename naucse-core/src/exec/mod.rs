//! Remote calls into a course image.
//!
//! The archiver never imports rendering code itself. Each call runs in a
//! fresh disposable container and talks to the host through a private
//! exchange directory.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐  input.json   ┌──────────────────────┐
//! │  Host (archiver) │ ─────────────►│  Container (--rm)    │
//! │                  │               │                      │
//! │  ExecutionBridge │  output.json  │  runner.py           │
//! │  ├─ call()       │◄───────────── │  └─ naucse_render.*  │
//! └──────────────────┘               └──────────────────────┘
//!        exchange dir: /naucse/aux      worktree: /naucse/wd (overlay)
//! ```

mod protocol;

pub use protocol::{ExecutionRequest, RemoteCall, RENDER_MODULE, RUNNER};

use crate::builder::{CONTAINER_AUX_DIR, CONTAINER_PYTHON, CONTAINER_WORKDIR};
use crate::course::{CourseInfo, Lesson, LessonBatch};
use crate::error::{ArchiveError, Result};
use crate::runtime::{ContainerRuntime, Mount, MountMode, RunSpec};
use protocol::{INPUT_FILE, OUTPUT_FILE, RUNNER_FILE};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Runs [`RemoteCall`]s in one image against one course worktree.
pub struct ExecutionBridge {
    runtime: Arc<dyn ContainerRuntime>,
    image: String,
    worktree: PathBuf,
}

impl ExecutionBridge {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        image: impl Into<String>,
        worktree: impl Into<PathBuf>,
    ) -> Self {
        Self { runtime, image: image.into(), worktree: worktree.into() }
    }

    /// Run one call and return the raw JSON result.
    ///
    /// The exchange directory is removed when this returns, on every path.
    pub async fn call(&self, call: &RemoteCall) -> Result<Value> {
        let request = call.request();
        let exchange = tempfile::Builder::new()
            .prefix("naucse-exchange-")
            .tempdir()
            .map_err(|e| ArchiveError::io(std::env::temp_dir(), e))?;
        let dir = exchange.path();

        write_file(&dir.join(RUNNER_FILE), RUNNER.as_bytes())?;
        write_file(&dir.join(INPUT_FILE), &request.to_json()?)?;

        info!(">> {}", request);
        let aux = |name: &str| format!("{}/{}", CONTAINER_AUX_DIR, name);
        let spec = RunSpec::new(&self.image)
            .mount(Mount::new(&self.worktree, CONTAINER_WORKDIR, MountMode::Overlay))
            .mount(Mount::new(dir, CONTAINER_AUX_DIR, MountMode::Private))
            .command([
                CONTAINER_PYTHON.to_string(),
                aux(RUNNER_FILE),
                aux(INPUT_FILE),
                aux(OUTPUT_FILE),
            ]);

        let output = self.runtime.run(&spec).await?;
        if !output.success() {
            return Err(ArchiveError::ExecutionFailed {
                call: request.to_string(),
                code: output.code,
            });
        }

        let output_path = dir.join(OUTPUT_FILE);
        let raw = match std::fs::read(&output_path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ArchiveError::ProtocolFailure {
                    call: request.to_string(),
                    reason: format!("{} was not written", OUTPUT_FILE),
                });
            }
            Err(e) => return Err(ArchiveError::io(output_path, e)),
        };
        debug!("{} returned {} bytes", request.callable, raw.len());
        serde_json::from_slice(&raw).map_err(|e| ArchiveError::ProtocolFailure {
            call: request.to_string(),
            reason: format!("malformed {}: {}", OUTPUT_FILE, e),
        })
    }

    /// `naucse_render.get_course` for the course `slug`.
    pub async fn describe_course(&self, slug: &str) -> Result<CourseInfo> {
        let call = RemoteCall::DescribeCourse { slug: slug.to_string() };
        self.call_typed(&call).await
    }

    /// `naucse_render.get_lessons` for a batch of lesson slugs.
    pub async fn fetch_resources(
        &self,
        slugs: &BTreeSet<String>,
        vars: &Value,
    ) -> Result<BTreeMap<String, Lesson>> {
        let call = RemoteCall::FetchResources { slugs: slugs.clone(), vars: vars.clone() };
        let batch: LessonBatch = self.call_typed(&call).await?;
        Ok(batch.data)
    }

    async fn call_typed<T: DeserializeOwned>(&self, call: &RemoteCall) -> Result<T> {
        let value = self.call(call).await?;
        serde_json::from_value(value).map_err(|e| ArchiveError::ProtocolFailure {
            call: call.to_string(),
            reason: format!("unexpected result shape: {}", e),
        })
    }
}

fn write_file(path: &Path, contents: &[u8]) -> Result<()> {
    std::fs::write(path, contents).map_err(|e| ArchiveError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::mock::MockRuntime;
    use crate::runtime::RunOutput;
    use serde_json::json;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn exchange_dir(spec: &RunSpec) -> PathBuf {
        spec.host_path_for(CONTAINER_AUX_DIR).unwrap().to_path_buf()
    }

    /// Runtime whose container writes `reply` as output.json.
    fn replying(reply: Value) -> Arc<MockRuntime> {
        Arc::new(MockRuntime::with_responder(move |spec| {
            std::fs::write(exchange_dir(spec).join("output.json"), reply.to_string()).unwrap();
            RunOutput { code: Some(0), stdout: Vec::new() }
        }))
    }

    /// Runtime that records the exchange dir and then behaves like `respond`.
    fn recording(
        respond: impl Fn(&Path) -> RunOutput + Send + Sync + 'static,
    ) -> (Arc<MockRuntime>, Arc<Mutex<Option<PathBuf>>>) {
        let seen = Arc::new(Mutex::new(None));
        let seen_in = seen.clone();
        let runtime = Arc::new(MockRuntime::with_responder(move |spec| {
            let dir = exchange_dir(spec);
            *seen_in.lock().unwrap() = Some(dir.clone());
            respond(&dir)
        }));
        (runtime, seen)
    }

    #[tokio::test]
    async fn test_call_writes_request_and_reads_reply() {
        let worktree = TempDir::new().unwrap();
        let seen = Arc::new(Mutex::new(None));
        let seen_in = seen.clone();
        let runtime = Arc::new(MockRuntime::with_responder(move |spec| {
            let dir = exchange_dir(spec);
            let input: Value =
                serde_json::from_slice(&std::fs::read(dir.join("input.json")).unwrap()).unwrap();
            assert!(dir.join("runner.py").exists());
            *seen_in.lock().unwrap() = Some((dir.clone(), input));
            std::fs::write(dir.join("output.json"), r#"{"ok": true}"#).unwrap();
            RunOutput { code: Some(0), stdout: Vec::new() }
        }));
        let bridge =
            ExecutionBridge::new(runtime.clone(), "localhost/naucse-py3.6-abc", worktree.path());

        let call = RemoteCall::DescribeCourse { slug: "intro".into() };
        let result = bridge.call(&call).await.unwrap();
        assert_eq!(result, json!({"ok": true}));

        let (dir, input) = seen.lock().unwrap().take().unwrap();
        assert_eq!(input[1], "get_course");
        assert!(!dir.exists(), "exchange dir must be removed");

        let run = &runtime.runs()[0];
        assert_eq!(run.image, "localhost/naucse-py3.6-abc");
        assert_eq!(
            run.command,
            vec![
                "/naucse/env/bin/python",
                "/naucse/aux/runner.py",
                "/naucse/aux/input.json",
                "/naucse/aux/output.json"
            ]
        );
        assert_eq!(run.host_path_for(CONTAINER_WORKDIR), Some(worktree.path()));
        assert_eq!(run.mounts[0].mode, MountMode::Overlay);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_execution_failure() {
        let worktree = TempDir::new().unwrap();
        let (runtime, seen) = recording(|_| RunOutput { code: Some(1), stdout: Vec::new() });
        let bridge = ExecutionBridge::new(runtime, "img", worktree.path());

        let err = bridge.call(&RemoteCall::DescribeCourse { slug: "x".into() }).await.unwrap_err();
        assert!(matches!(err, ArchiveError::ExecutionFailed { code: Some(1), .. }));
        let dir = seen.lock().unwrap().take().unwrap();
        assert!(!dir.exists(), "exchange dir must be removed after a failed run");
    }

    #[tokio::test]
    async fn test_missing_output_is_protocol_failure() {
        let worktree = TempDir::new().unwrap();
        let bridge = ExecutionBridge::new(Arc::new(MockRuntime::new()), "img", worktree.path());

        let err = bridge.call(&RemoteCall::DescribeCourse { slug: "x".into() }).await.unwrap_err();
        match err {
            ArchiveError::ProtocolFailure { call, reason } => {
                assert!(call.contains("get_course"));
                assert!(call.contains("\"x\""));
                assert!(reason.contains("output.json"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_output_is_protocol_failure() {
        let worktree = TempDir::new().unwrap();
        let (runtime, seen) = recording(|dir| {
            std::fs::write(dir.join("output.json"), "{not json").unwrap();
            RunOutput { code: Some(0), stdout: Vec::new() }
        });
        let bridge = ExecutionBridge::new(runtime, "img", worktree.path());

        let err = bridge.call(&RemoteCall::DescribeCourse { slug: "x".into() }).await.unwrap_err();
        assert!(matches!(err, ArchiveError::ProtocolFailure { .. }));
        let dir = seen.lock().unwrap().take().unwrap();
        assert!(!dir.exists(), "exchange dir must be removed after a bad reply");
    }

    #[tokio::test]
    async fn test_describe_course_typed() {
        let worktree = TempDir::new().unwrap();
        let runtime = replying(json!({"api_version": [0, 3], "course": {"title": "Kurz"}}));
        let bridge = ExecutionBridge::new(runtime, "img", worktree.path());

        let info = bridge.describe_course("kurz").await.unwrap();
        assert_eq!(info.api_version, crate::course::ApiVersion(0, 3));
        assert_eq!(info.course["title"], "Kurz");
    }

    #[tokio::test]
    async fn test_fetch_resources_returns_data() {
        let worktree = TempDir::new().unwrap();
        let runtime = replying(json!({
            "api_version": [0, 3],
            "data": {"intro": {"pages": {"index": {"content": "<p>x</p>"}}}}
        }));
        let bridge = ExecutionBridge::new(runtime, "img", worktree.path());

        let slugs: BTreeSet<String> = ["intro".to_string()].into();
        let lessons = bridge.fetch_resources(&slugs, &json!({})).await.unwrap();
        assert_eq!(lessons["intro"].pages["index"].content.as_inline(), Some("<p>x</p>"));
    }

    #[tokio::test]
    async fn test_wrong_shape_is_protocol_failure() {
        let worktree = TempDir::new().unwrap();
        let bridge = ExecutionBridge::new(replying(json!([1, 2])), "img", worktree.path());

        let err = bridge.describe_course("x").await.unwrap_err();
        assert!(matches!(err, ArchiveError::ProtocolFailure { .. }));
    }
}
