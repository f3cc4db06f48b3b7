//! Course documents produced by `naucse_render`.
//!
//! `get_course` returns `{"api_version": [major, minor], "course": {...}}`.
//! The archiver accepts versions below 0.4, upgrades the document to 0.4,
//! and attaches the resolved lessons.

pub mod lesson;

pub use lesson::{Content, Lesson, LessonBatch, Page, Solution, StaticFile};

use crate::error::{ArchiveError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

/// `[major, minor]` version of the rendering API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ApiVersion(pub u32, pub u32);

impl ApiVersion {
    /// First version the archiver does not understand.
    pub const CEILING: ApiVersion = ApiVersion(0, 4);

    /// Version of the archived `course.json`.
    pub const ARCHIVED: ApiVersion = ApiVersion(0, 4);

    /// Versions below this have no session serials.
    pub const SERIALS: ApiVersion = ApiVersion(0, 1);

    pub fn ensure_supported(self) -> Result<()> {
        if self >= Self::CEILING {
            return Err(ArchiveError::UnsupportedApiVersion { major: self.0, minor: self.1 });
        }
        Ok(())
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.0, self.1)
    }
}

/// Response of `get_course`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseInfo {
    pub api_version: ApiVersion,
    pub course: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CourseInfo {
    /// Upgrade the document to the archived API version.
    ///
    /// Rejects versions at or above [`ApiVersion::CEILING`]. Fills in the
    /// fields that later versions made mandatory.
    pub fn normalize(&mut self, commit_id: &str, default_timezone: &str) -> Result<()> {
        self.api_version.ensure_supported()?;
        if self.api_version < ApiVersion::SERIALS {
            add_serials(&mut self.course);
        }
        self.course.entry("etag").or_insert_with(|| Value::from(commit_id));
        self.course.entry("timezone").or_insert_with(|| Value::from(default_timezone));
        self.api_version = ApiVersion::ARCHIVED;
        Ok(())
    }

    /// Slugs of every lesson referenced from a session's materials.
    pub fn lesson_slugs(&self) -> BTreeSet<String> {
        sessions(&self.course)
            .filter_map(|session| session.get("materials").and_then(Value::as_array))
            .flatten()
            .filter_map(|material| material.get("lesson_slug").and_then(Value::as_str))
            .filter(|slug| !slug.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Template variables passed to `get_lessons`.
    pub fn vars(&self) -> Value {
        self.course.get("vars").cloned().unwrap_or_else(|| Value::Object(Map::new()))
    }

    /// Record where the course source can be edited, unless already set.
    pub fn set_default_edit_info(&mut self, repo: &str, branch: &str) {
        self.course.entry("edit_info").or_insert_with(|| {
            serde_json::json!({
                "url": repo,
                "branch": branch,
            })
        });
    }

    pub fn set_lessons(&mut self, lessons: BTreeMap<String, Lesson>) -> Result<()> {
        self.course.insert("lessons".to_string(), serde_json::to_value(lessons)?);
        Ok(())
    }

    /// Write `course.json` with sorted keys, one-space indentation and
    /// non-ASCII characters as `\uXXXX` escapes.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        // Round-tripping through `Value` sorts every object's keys.
        let value = serde_json::to_value(self)?;
        let mut out = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b" ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
        value.serialize(&mut serializer)?;
        let mut text = ascii_escape(&String::from_utf8_lossy(&out));
        text.push('\n');
        std::fs::write(path, text).map_err(|e| ArchiveError::io(path, e))
    }
}

/// Escape every non-ASCII character of serialized JSON as `\uXXXX`, using
/// surrogate pairs outside the Basic Multilingual Plane.
///
/// Non-ASCII text can only appear inside JSON strings, where the escape is
/// equivalent to the raw character.
fn ascii_escape(json: &str) -> String {
    let mut out = String::with_capacity(json.len());
    let mut units = [0u16; 2];
    for c in json.chars() {
        if c.is_ascii() {
            out.push(c);
            continue;
        }
        for unit in c.encode_utf16(&mut units).iter() {
            out.push_str(&format!("\\u{:04x}", unit));
        }
    }
    out
}

fn sessions(course: &Map<String, Value>) -> impl Iterator<Item = &Map<String, Value>> {
    course
        .get("sessions")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_object)
}

/// Number sessions that have no `serial`, in document order.
fn add_serials(course: &mut Map<String, Value>) {
    let Some(sessions) = course.get_mut("sessions").and_then(Value::as_array_mut) else {
        return;
    };
    let mut serial = 0u32;
    for session in sessions.iter_mut().filter_map(Value::as_object_mut) {
        serial += 1;
        session.entry("serial").or_insert_with(|| Value::from(serial.to_string()));
    }
}
