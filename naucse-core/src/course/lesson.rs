//! Lesson documents as returned by `get_lessons`.
//!
//! Only the fields the archiver rewrites are typed; everything else is kept
//! verbatim in the `extra` maps and written back to `course.json` unchanged.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Page or solution content: inline HTML from the renderer, or a stored file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Inline(String),
    Stored { path: String },
}

impl Content {
    /// Inline HTML, if not yet written out.
    pub fn as_inline(&self) -> Option<&str> {
        match self {
            Content::Inline(html) => Some(html),
            Content::Stored { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Solution {
    pub content: Content,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub content: Content,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub solutions: Option<Vec<Solution>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticFile {
    /// Source path relative to the course worktree; rewritten to the archived copy.
    pub path: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lesson {
    #[serde(default)]
    pub pages: BTreeMap<String, Page>,
    #[serde(default)]
    pub static_files: BTreeMap<String, StaticFile>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Response of one `get_lessons` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LessonBatch {
    pub data: BTreeMap<String, Lesson>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unknown_fields_survive() {
        let raw = json!({
            "title": "Intro",
            "pages": {
                "index": {
                    "content": "<p>hi</p>",
                    "css": ".x{}",
                    "solutions": [{"content": "<p>42</p>"}]
                }
            },
            "static_files": {"img.png": {"path": "lessons/intro/img.png"}}
        });
        let lesson: Lesson = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(lesson.pages["index"].content.as_inline(), Some("<p>hi</p>"));
        assert_eq!(lesson.extra["title"], "Intro");
        assert_eq!(serde_json::to_value(&lesson).unwrap(), raw);
    }

    #[test]
    fn test_stored_content_serializes_as_path_object() {
        let page = Page {
            content: Content::Stored { path: "lessons/intro/index.html".into() },
            solutions: None,
            extra: Map::new(),
        };
        assert_eq!(
            serde_json::to_value(&page).unwrap(),
            json!({"content": {"path": "lessons/intro/index.html"}})
        );
    }

    #[test]
    fn test_missing_sections_default_to_empty() {
        let lesson: Lesson = serde_json::from_value(json!({})).unwrap();
        assert!(lesson.pages.is_empty());
        assert!(lesson.static_files.is_empty());
    }
}
