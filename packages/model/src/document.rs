//! # Document Snapshot
//!
//! Immutable, key-addressed representation of a block document.
//!
//! A snapshot is an ordered list of blocks. Text blocks hold an ordered list
//! of spans; object blocks hold arbitrary primitive fields. Every block and
//! span key is unique within a snapshot, and keys are the only way patches
//! address nodes.
//!
//! ## Lifecycle
//!
//! ```text
//! deserialize / apply_operation → DocumentSnapshot (frozen) → Arc shared
//!                                        ↓
//!                        replaced wholesale on the next change
//! ```
//!
//! There are no parent pointers. Each snapshot carries a key lookup table
//! built once at construction time.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ModelError;

/// Inline text run with a set of marks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub key: String,
    pub text: String,
    #[serde(default)]
    pub marks: BTreeSet<String>,
}

impl Span {
    pub fn new(key: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            text: text.into(),
            marks: BTreeSet::new(),
        }
    }

    pub fn with_marks<I, M>(mut self, marks: I) -> Self
    where
        I: IntoIterator<Item = M>,
        M: Into<String>,
    {
        self.marks = marks.into_iter().map(Into::into).collect();
        self
    }

    /// Text length in chars (the unit used by offsets)
    pub fn len(&self) -> usize {
        self.text.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Content of a block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum BlockBody {
    /// Rich text block: a paragraph style plus inline spans
    Text { style: String, spans: Vec<Span> },

    /// Embedded object (image, code, ...) with primitive fields
    Object { fields: Map<String, Value> },
}

/// Top-level document entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub key: String,
    pub block_type: String,
    pub body: BlockBody,
}

impl Block {
    /// Create a text block of type `block` with the `normal` style
    pub fn text(key: impl Into<String>, spans: Vec<Span>) -> Self {
        Self {
            key: key.into(),
            block_type: "block".to_string(),
            body: BlockBody::Text {
                style: "normal".to_string(),
                spans,
            },
        }
    }

    /// Create an object block
    pub fn object(key: impl Into<String>, block_type: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            key: key.into(),
            block_type: block_type.into(),
            body: BlockBody::Object { fields },
        }
    }

    pub fn with_style(mut self, new_style: impl Into<String>) -> Self {
        if let BlockBody::Text { style, .. } = &mut self.body {
            *style = new_style.into();
        }
        self
    }

    pub fn spans(&self) -> &[Span] {
        match &self.body {
            BlockBody::Text { spans, .. } => spans,
            BlockBody::Object { .. } => &[],
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self.body, BlockBody::Text { .. })
    }

    /// Concatenated text of all spans
    pub fn plain_text(&self) -> String {
        self.spans().iter().map(|s| s.text.as_str()).collect()
    }
}

/// Where a key lives inside a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeLocation {
    Block(usize),
    Span { block: usize, span: usize },
}

/// Immutable document state at one instant
#[derive(Debug, Clone, Default)]
pub struct DocumentSnapshot {
    blocks: Vec<Block>,
    index: HashMap<String, NodeLocation>,
}

impl PartialEq for DocumentSnapshot {
    fn eq(&self, other: &Self) -> bool {
        // The index is derived from the blocks
        self.blocks == other.blocks
    }
}

impl DocumentSnapshot {
    /// Build a snapshot, validating key uniqueness
    pub fn new(blocks: Vec<Block>) -> Result<Self, ModelError> {
        let mut index = HashMap::new();

        for (b, block) in blocks.iter().enumerate() {
            if index.insert(block.key.clone(), NodeLocation::Block(b)).is_some() {
                return Err(ModelError::DuplicateKey(block.key.clone()));
            }
            for (s, span) in block.spans().iter().enumerate() {
                let location = NodeLocation::Span { block: b, span: s };
                if index.insert(span.key.clone(), location).is_some() {
                    return Err(ModelError::DuplicateKey(span.key.clone()));
                }
            }
        }

        Ok(Self { blocks, index })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn into_blocks(self) -> Vec<Block> {
        self.blocks
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn locate(&self, key: &str) -> Option<NodeLocation> {
        self.index.get(key).copied()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn block(&self, key: &str) -> Option<&Block> {
        match self.locate(key)? {
            NodeLocation::Block(b) => self.blocks.get(b),
            NodeLocation::Span { .. } => None,
        }
    }

    pub fn block_index(&self, key: &str) -> Option<usize> {
        match self.locate(key)? {
            NodeLocation::Block(b) => Some(b),
            NodeLocation::Span { .. } => None,
        }
    }

    pub fn span(&self, key: &str) -> Option<&Span> {
        match self.locate(key)? {
            NodeLocation::Span { block, span } => self.blocks.get(block)?.spans().get(span),
            NodeLocation::Block(_) => None,
        }
    }

    /// Key of the top-level block containing `key` (itself for blocks)
    pub fn top_level_key(&self, key: &str) -> Option<&str> {
        let b = match self.locate(key)? {
            NodeLocation::Block(b) => b,
            NodeLocation::Span { block, .. } => block,
        };
        self.blocks.get(b).map(|block| block.key.as_str())
    }

    /// Length of the addressable text at `key`: span text length, 0 for blocks
    pub fn text_len(&self, key: &str) -> Option<usize> {
        match self.locate(key)? {
            NodeLocation::Span { .. } => self.span(key).map(Span::len),
            NodeLocation::Block(_) => Some(0),
        }
    }

    /// First addressable key: the first span of the first block, or the block itself
    pub fn first_key(&self) -> Option<&str> {
        let block = self.blocks.first()?;
        Some(
            block
                .spans()
                .first()
                .map(|s| s.key.as_str())
                .unwrap_or(block.key.as_str()),
        )
    }

    pub fn block_keys(&self) -> impl Iterator<Item = &str> {
        self.blocks.iter().map(|b| b.key.as_str())
    }
}
