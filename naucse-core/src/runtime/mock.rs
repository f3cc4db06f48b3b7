//! In-memory runtime for unit tests.

use super::{BuildSpec, ContainerRuntime, RunOutput, RunSpec};
use crate::error::{ArchiveError, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Mutex;

/// What a mock build saw in its context directory.
#[derive(Debug, Clone)]
pub(crate) struct BuildRecord {
    pub tag: Option<String>,
    pub context_dir: PathBuf,
    pub containerfile: String,
    pub files: BTreeMap<String, String>,
}

type Responder = Box<dyn Fn(&RunSpec) -> RunOutput + Send + Sync>;

/// Records builds and runs; runs are answered by a responder closure.
pub(crate) struct MockRuntime {
    images: Mutex<HashSet<String>>,
    builds: Mutex<Vec<BuildRecord>>,
    runs: Mutex<Vec<RunSpec>>,
    fail_builds: bool,
    responder: Responder,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::with_responder(|_| RunOutput { code: Some(0), stdout: Vec::new() })
    }

    pub fn with_responder(
        responder: impl Fn(&RunSpec) -> RunOutput + Send + Sync + 'static,
    ) -> Self {
        Self {
            images: Mutex::new(HashSet::new()),
            builds: Mutex::new(Vec::new()),
            runs: Mutex::new(Vec::new()),
            fail_builds: false,
            responder: Box::new(responder),
        }
    }

    pub fn failing_builds() -> Self {
        Self { fail_builds: true, ..Self::new() }
    }

    pub fn builds(&self) -> Vec<BuildRecord> {
        self.builds.lock().unwrap().clone()
    }

    pub fn runs(&self) -> Vec<RunSpec> {
        self.runs.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn image_exists(&self, name: &str) -> Result<bool> {
        Ok(self.images.lock().unwrap().contains(name))
    }

    async fn build(&self, spec: &BuildSpec) -> Result<String> {
        let mut files = BTreeMap::new();
        for entry in std::fs::read_dir(&spec.context_dir).unwrap() {
            let entry = entry.unwrap();
            let name = entry.file_name().to_string_lossy().into_owned();
            if name != "Containerfile" {
                files.insert(name, std::fs::read_to_string(entry.path()).unwrap());
            }
        }
        let containerfile =
            std::fs::read_to_string(spec.context_dir.join("Containerfile")).unwrap();
        let mut builds = self.builds.lock().unwrap();
        builds.push(BuildRecord {
            tag: spec.tag.clone(),
            context_dir: spec.context_dir.clone(),
            containerfile,
            files,
        });
        if self.fail_builds {
            return Err(ArchiveError::BuildFailed {
                image: spec.tag.clone().unwrap_or_default(),
                code: Some(1),
            });
        }
        let name = spec.tag.clone().unwrap_or_else(|| format!("sha256:mock{}", builds.len()));
        self.images.lock().unwrap().insert(name.clone());
        Ok(name)
    }

    async fn run(&self, spec: &RunSpec) -> Result<RunOutput> {
        self.runs.lock().unwrap().push(spec.clone());
        Ok((self.responder)(spec))
    }
}
