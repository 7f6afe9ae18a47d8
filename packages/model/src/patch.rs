//! # Patches
//!
//! Structural and textual mutation instructions exchanged with the
//! persistence layer.
//!
//! ## Wire shape
//!
//! ```json
//! { "type": "insert", "path": [{"_key": "b1"}], "origin": "local",
//!   "position": "after", "items": [ ... ] }
//! ```
//!
//! Paths are sequences of locators. A locator is either a field name or a
//! `{ "_key": ... }` object; positional indices cannot be expressed.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::TextDelta;

/// Where a patch came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PatchOrigin {
    Local,
    Remote,
}

/// One step of a patch path
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Locator {
    Key {
        #[serde(rename = "_key")]
        key: String,
    },
    Field(String),
}

impl Locator {
    pub fn key(key: impl Into<String>) -> Self {
        Locator::Key { key: key.into() }
    }

    pub fn field(name: impl Into<String>) -> Self {
        Locator::Field(name.into())
    }

    pub fn as_key(&self) -> Option<&str> {
        match self {
            Locator::Key { key } => Some(key),
            Locator::Field(_) => None,
        }
    }

    pub fn as_field(&self) -> Option<&str> {
        match self {
            Locator::Field(name) => Some(name),
            Locator::Key { .. } => None,
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Key { key } => write!(f, "[_key=={:?}]", key),
            Locator::Field(name) => write!(f, ".{}", name),
        }
    }
}

/// Render a path for logs and error messages
pub fn display_path(path: &[Locator]) -> String {
    if path.is_empty() {
        return "<root>".to_string();
    }
    path.iter().map(ToString::to_string).collect()
}

/// Placement of inserted items relative to the path target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InsertPosition {
    Before,
    After,
    Replace,
}

/// The operation a patch performs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PatchKind {
    Set { value: Value },
    Unset,
    Insert { position: InsertPosition, items: Vec<Value> },
    DiffMatchPatch { value: TextDelta },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    #[serde(flatten)]
    pub kind: PatchKind,
    pub path: Vec<Locator>,
    pub origin: PatchOrigin,
}

impl Patch {
    pub fn set(path: Vec<Locator>, value: Value) -> Self {
        Self::local(PatchKind::Set { value }, path)
    }

    pub fn unset(path: Vec<Locator>) -> Self {
        Self::local(PatchKind::Unset, path)
    }

    pub fn insert(path: Vec<Locator>, position: InsertPosition, items: Vec<Value>) -> Self {
        Self::local(PatchKind::Insert { position, items }, path)
    }

    pub fn diff_match_patch(path: Vec<Locator>, delta: TextDelta) -> Self {
        Self::local(PatchKind::DiffMatchPatch { value: delta }, path)
    }

    fn local(kind: PatchKind, path: Vec<Locator>) -> Self {
        Self {
            kind,
            path,
            origin: PatchOrigin::Local,
        }
    }

    pub fn with_origin(mut self, origin: PatchOrigin) -> Self {
        self.origin = origin;
        self
    }

    pub fn is_remote(&self) -> bool {
        self.origin == PatchOrigin::Remote
    }

    /// `insert` and `unset` add or remove whole nodes
    pub fn is_structural(&self) -> bool {
        matches!(self.kind, PatchKind::Insert { .. } | PatchKind::Unset)
    }

    /// Key of the top-level block this patch targets, if any
    pub fn top_level_key(&self) -> Option<&str> {
        self.path.first().and_then(Locator::as_key)
    }

    pub fn type_name(&self) -> &'static str {
        match self.kind {
            PatchKind::Set { .. } => "set",
            PatchKind::Unset => "unset",
            PatchKind::Insert { .. } => "insert",
            PatchKind::DiffMatchPatch { .. } => "diffMatchPatch",
        }
    }
}
