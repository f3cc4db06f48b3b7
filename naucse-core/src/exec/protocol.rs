//! Request format for remote calls over the exchange directory.
//!
//! # Exchange Layout
//!
//! ```text
//! /naucse/aux/
//! ├── runner.py     # fixed bootstrap, see RUNNER
//! ├── input.json    # [module, callable, args, kwargs]
//! └── output.json   # return value, written by the runner
//! ```
//!
//! Only the calls in [`RemoteCall`] can be issued. The runner repeats the
//! same allow-list, so a tampered request cannot reach other callables.

use serde::ser::{Serialize, SerializeTuple, Serializer};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::fmt;

/// Module that implements every remote call.
pub const RENDER_MODULE: &str = "naucse_render";

/// Version of the `get_course` output requested from the renderer.
pub const COURSE_FORMAT_VERSION: u32 = 1;

pub const RUNNER_FILE: &str = "runner.py";
pub const INPUT_FILE: &str = "input.json";
pub const OUTPUT_FILE: &str = "output.json";

/// Bootstrap executed inside the container.
pub const RUNNER: &str = r#"'''Run one allowed naucse_render call, serialized as JSON.'''

from importlib import import_module
import json
import sys

ALLOWED = {('naucse_render', 'get_course'), ('naucse_render', 'get_lessons')}

with open(sys.argv[1], encoding='utf-8') as infile:
    module_name, obj_name, args, kwargs = json.load(infile)

if (module_name, obj_name) not in ALLOWED:
    sys.exit(f'call not allowed: {module_name}:{obj_name}')

obj = getattr(import_module(module_name), obj_name)
result = obj(*args, **kwargs)

with open(sys.argv[2], 'w', encoding='utf-8') as outfile:
    json.dump(result, outfile)
"#;

/// The closed set of operations the archiver runs inside a course image.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCall {
    /// Render the course description for `slug`.
    DescribeCourse { slug: String },
    /// Render a batch of lessons with the course's template variables.
    FetchResources { slugs: BTreeSet<String>, vars: Value },
}

impl RemoteCall {
    pub fn callable(&self) -> &'static str {
        match self {
            RemoteCall::DescribeCourse { .. } => "get_course",
            RemoteCall::FetchResources { .. } => "get_lessons",
        }
    }

    pub fn request(&self) -> ExecutionRequest {
        let (args, kwargs) = match self {
            RemoteCall::DescribeCourse { slug } => (
                vec![json!(slug)],
                json!({"version": COURSE_FORMAT_VERSION, "path": "."}),
            ),
            RemoteCall::FetchResources { slugs, vars } => {
                // BTreeSet iteration keeps the batch sorted.
                let slugs: Vec<&String> = slugs.iter().collect();
                (vec![json!(slugs)], json!({"vars": vars, "path": "."}))
            }
        };
        let kwargs = match kwargs {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        ExecutionRequest {
            module: RENDER_MODULE.to_string(),
            callable: self.callable().to_string(),
            args,
            kwargs,
        }
    }
}

impl fmt::Display for RemoteCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.request())
    }
}

/// One serialized call, written to `input.json`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionRequest {
    pub module: String,
    pub callable: String,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
}

impl ExecutionRequest {
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

impl Serialize for ExecutionRequest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(4)?;
        tuple.serialize_element(&self.module)?;
        tuple.serialize_element(&self.callable)?;
        tuple.serialize_element(&self.args)?;
        tuple.serialize_element(&self.kwargs)?;
        tuple.end()
    }
}

/// `module:callable(args, key=value)`, as shown in logs and errors.
impl fmt::Display for ExecutionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}(", self.module, self.callable)?;
        let mut first = true;
        for arg in &self.args {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(f, "{}", arg)?;
        }
        for (key, value) in &self.kwargs {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(f, "{}={}", key, value)?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_course_request() {
        let call = RemoteCall::DescribeCourse { slug: "2019/pyladies".into() };
        let json: Value = serde_json::from_slice(&call.request().to_json().unwrap()).unwrap();
        assert_eq!(
            json,
            json!(["naucse_render", "get_course", ["2019/pyladies"], {"version": 1, "path": "."}])
        );
    }

    #[test]
    fn test_fetch_resources_sorted() {
        let slugs: BTreeSet<String> = ["setup", "intro"].iter().map(|s| s.to_string()).collect();
        let call = RemoteCall::FetchResources { slugs, vars: json!({"coach": true}) };
        let json: Value = serde_json::from_slice(&call.request().to_json().unwrap()).unwrap();
        assert_eq!(
            json,
            json!([
                "naucse_render",
                "get_lessons",
                [["intro", "setup"]],
                {"vars": {"coach": true}, "path": "."}
            ])
        );
    }

    #[test]
    fn test_display() {
        let call = RemoteCall::DescribeCourse { slug: "intro".into() };
        assert_eq!(call.to_string(), r#"naucse_render:get_course("intro", path=".", version=1)"#);
    }

    #[test]
    fn test_runner_allows_every_call() {
        let calls = [
            RemoteCall::DescribeCourse { slug: String::new() },
            RemoteCall::FetchResources { slugs: BTreeSet::new(), vars: Value::Null },
        ];
        for call in calls {
            let entry = format!("('{}', '{}')", RENDER_MODULE, call.callable());
            assert!(RUNNER.contains(&entry), "{} missing from runner", entry);
        }
    }
}
