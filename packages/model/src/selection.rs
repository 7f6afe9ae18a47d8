//! Editor selection addressed by node keys

use serde::{Deserialize, Serialize};

/// A caret position: node key plus char offset into its text
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub key: String,
    pub offset: usize,
}

impl Point {
    pub fn new(key: impl Into<String>, offset: usize) -> Self {
        Self {
            key: key.into(),
            offset,
        }
    }
}

/// Anchor/focus pair. An unset selection is `Option<Selection>::None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub anchor: Point,
    pub focus: Point,
}

impl Selection {
    pub fn new(anchor: Point, focus: Point) -> Self {
        Self { anchor, focus }
    }

    /// Collapsed caret at a single point
    pub fn caret(key: impl Into<String>, offset: usize) -> Self {
        let point = Point::new(key, offset);
        Self {
            anchor: point.clone(),
            focus: point,
        }
    }

    pub fn is_collapsed(&self) -> bool {
        self.anchor == self.focus
    }

    pub fn keys(&self) -> [&str; 2] {
        [self.anchor.key.as_str(), self.focus.key.as_str()]
    }
}
