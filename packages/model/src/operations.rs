//! # Editor Operations
//!
//! Primitive, invertible edits produced by the editor surface.
//!
//! ## Design
//!
//! - Every operation carries what it needs to be inverted (removed text,
//!   removed node, previous data), so an operation log can be reversed
//!   without consulting the snapshot it was applied to
//! - Applying an operation never mutates a snapshot in place: a new
//!   snapshot is built and the old one stays valid for anyone holding it
//! - Text offsets are char offsets

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Block, BlockBody, DocumentSnapshot, ModelError, NodeLocation, Selection, Span};

/// A primitive editor operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    InsertText {
        key: String,
        offset: usize,
        text: String,
    },

    RemoveText {
        key: String,
        offset: usize,
        text: String,
    },

    InsertBlock {
        index: usize,
        block: Block,
    },

    RemoveBlock {
        index: usize,
        block: Block,
    },

    InsertSpan {
        block_key: String,
        index: usize,
        span: Span,
    },

    RemoveSpan {
        block_key: String,
        index: usize,
        span: Span,
    },

    /// Set (`Some`) or clear (`None`) a block field. Text blocks only
    /// expose `style`.
    SetBlockData {
        key: String,
        field: String,
        value: Option<Value>,
        #[serde(default)]
        previous: Option<Value>,
    },

    SetMarks {
        key: String,
        marks: BTreeSet<String>,
        #[serde(default)]
        previous: BTreeSet<String>,
    },

    SetSelection {
        selection: Option<Selection>,
        #[serde(default)]
        previous: Option<Selection>,
    },
}

impl Operation {
    /// Plain text insert/remove
    pub fn is_text_edit(&self) -> bool {
        matches!(self, Operation::InsertText { .. } | Operation::RemoveText { .. })
    }

    pub fn is_selection(&self) -> bool {
        matches!(self, Operation::SetSelection { .. })
    }

    /// Text inserted or removed by a text edit
    pub fn text(&self) -> Option<&str> {
        match self {
            Operation::InsertText { text, .. } | Operation::RemoveText { text, .. } => Some(text),
            _ => None,
        }
    }

    /// Key of the node the operation targets
    pub fn target_key(&self) -> Option<&str> {
        match self {
            Operation::InsertText { key, .. }
            | Operation::RemoveText { key, .. }
            | Operation::SetBlockData { key, .. }
            | Operation::SetMarks { key, .. } => Some(key),
            Operation::InsertBlock { block, .. } | Operation::RemoveBlock { block, .. } => {
                Some(&block.key)
            }
            Operation::InsertSpan { block_key, .. } | Operation::RemoveSpan { block_key, .. } => {
                Some(block_key)
            }
            Operation::SetSelection { .. } => None,
        }
    }

    /// The operation that undoes this one
    pub fn invert(&self) -> Operation {
        match self.clone() {
            Operation::InsertText { key, offset, text } => Operation::RemoveText { key, offset, text },
            Operation::RemoveText { key, offset, text } => Operation::InsertText { key, offset, text },
            Operation::InsertBlock { index, block } => Operation::RemoveBlock { index, block },
            Operation::RemoveBlock { index, block } => Operation::InsertBlock { index, block },
            Operation::InsertSpan { block_key, index, span } => {
                Operation::RemoveSpan { block_key, index, span }
            }
            Operation::RemoveSpan { block_key, index, span } => {
                Operation::InsertSpan { block_key, index, span }
            }
            Operation::SetBlockData { key, field, value, previous } => Operation::SetBlockData {
                key,
                field,
                value: previous,
                previous: value,
            },
            Operation::SetMarks { key, marks, previous } => Operation::SetMarks {
                key,
                marks: previous,
                previous: marks,
            },
            Operation::SetSelection { selection, previous } => Operation::SetSelection {
                selection: previous,
                previous: selection,
            },
        }
    }
}

/// Invert an operation log: reversed order, each operation inverted
pub fn invert_operations(operations: &[Operation]) -> Vec<Operation> {
    operations.iter().rev().map(Operation::invert).collect()
}

/// Apply one operation, producing a new snapshot
pub fn apply_operation(snapshot: &DocumentSnapshot, op: &Operation) -> Result<DocumentSnapshot, ModelError> {
    if op.is_selection() {
        return Ok(snapshot.clone());
    }

    let mut blocks = snapshot.blocks().to_vec();

    match op {
        Operation::InsertText { key, offset, text } => {
            let span = span_mut(snapshot, &mut blocks, key)?;
            let at = byte_offset(&span.text, *offset).ok_or_else(|| ModelError::OffsetOutOfRange {
                key: key.clone(),
                offset: *offset,
                len: span.len(),
            })?;
            span.text.insert_str(at, text);
        }

        Operation::RemoveText { key, offset, text } => {
            let span = span_mut(snapshot, &mut blocks, key)?;
            let len = span.len();
            let end_offset = offset + text.chars().count();
            let (start, end) = match (byte_offset(&span.text, *offset), byte_offset(&span.text, end_offset)) {
                (Some(start), Some(end)) => (start, end),
                _ => {
                    return Err(ModelError::OffsetOutOfRange {
                        key: key.clone(),
                        offset: end_offset,
                        len,
                    })
                }
            };
            if span.text[start..end] != *text {
                return Err(ModelError::TextMismatch {
                    key: key.clone(),
                    offset: *offset,
                    expected: text.clone(),
                    found: span.text[start..end].to_string(),
                });
            }
            span.text.replace_range(start..end, "");
        }

        Operation::InsertBlock { index, block } => {
            if *index > blocks.len() {
                return Err(ModelError::IndexOutOfRange {
                    index: *index,
                    len: blocks.len(),
                });
            }
            blocks.insert(*index, block.clone());
        }

        Operation::RemoveBlock { block, .. } => {
            let index = snapshot
                .block_index(&block.key)
                .ok_or_else(|| ModelError::KeyNotFound(block.key.clone()))?;
            blocks.remove(index);
        }

        Operation::InsertSpan { block_key, index, span } => {
            let spans = spans_mut(snapshot, &mut blocks, block_key)?;
            if *index > spans.len() {
                return Err(ModelError::IndexOutOfRange {
                    index: *index,
                    len: spans.len(),
                });
            }
            spans.insert(*index, span.clone());
        }

        Operation::RemoveSpan { block_key, span, .. } => {
            let spans = spans_mut(snapshot, &mut blocks, block_key)?;
            let index = spans
                .iter()
                .position(|s| s.key == span.key)
                .ok_or_else(|| ModelError::KeyNotFound(span.key.clone()))?;
            spans.remove(index);
        }

        Operation::SetBlockData { key, field, value, .. } => {
            let index = snapshot
                .block_index(key)
                .ok_or_else(|| ModelError::KeyNotFound(key.clone()))?;
            set_block_data(&mut blocks[index], field, value.as_ref())?;
        }

        Operation::SetMarks { key, marks, .. } => {
            let span = span_mut(snapshot, &mut blocks, key)?;
            span.marks = marks.clone();
        }

        Operation::SetSelection { .. } => {}
    }

    DocumentSnapshot::new(blocks)
}

/// Apply a sequence of operations in order
pub fn apply_operations(snapshot: &DocumentSnapshot, operations: &[Operation]) -> Result<DocumentSnapshot, ModelError> {
    let mut current = snapshot.clone();
    for op in operations {
        current = apply_operation(&current, op)?;
    }
    Ok(current)
}

/// Current value of a block field, as `SetBlockData` sees it
pub fn block_data(block: &Block, field: &str) -> Option<Value> {
    match &block.body {
        BlockBody::Text { style, .. } if field == "style" => Some(Value::String(style.clone())),
        BlockBody::Text { .. } => None,
        BlockBody::Object { fields } => fields.get(field).cloned(),
    }
}

fn set_block_data(block: &mut Block, field: &str, value: Option<&Value>) -> Result<(), ModelError> {
    if field == "_key" || field == "_type" {
        return Err(ModelError::ReservedField(field.to_string()));
    }

    match &mut block.body {
        BlockBody::Text { style, .. } => {
            if field != "style" {
                return Err(ModelError::NotAnObjectBlock(block.key.clone()));
            }
            *style = match value {
                Some(Value::String(s)) => s.clone(),
                None => "normal".to_string(),
                Some(other) => {
                    return Err(ModelError::InvalidValue(format!(
                        "style must be a string, got {}",
                        other
                    )))
                }
            };
        }
        BlockBody::Object { fields } => match value {
            Some(v) => {
                fields.insert(field.to_string(), v.clone());
            }
            None => {
                fields.remove(field);
            }
        },
    }

    Ok(())
}

fn span_mut<'a>(snapshot: &DocumentSnapshot, blocks: &'a mut [Block], key: &str) -> Result<&'a mut Span, ModelError> {
    match snapshot.locate(key) {
        Some(NodeLocation::Span { block, span }) => match &mut blocks[block].body {
            BlockBody::Text { spans, .. } => Ok(&mut spans[span]),
            BlockBody::Object { .. } => Err(ModelError::NotASpan(key.to_string())),
        },
        Some(NodeLocation::Block(_)) => Err(ModelError::NotASpan(key.to_string())),
        None => Err(ModelError::KeyNotFound(key.to_string())),
    }
}

fn spans_mut<'a>(snapshot: &DocumentSnapshot, blocks: &'a mut [Block], block_key: &str) -> Result<&'a mut Vec<Span>, ModelError> {
    let index = snapshot
        .block_index(block_key)
        .ok_or_else(|| ModelError::KeyNotFound(block_key.to_string()))?;
    match &mut blocks[index].body {
        BlockBody::Text { spans, .. } => Ok(spans),
        BlockBody::Object { .. } => Err(ModelError::NotATextBlock(block_key.to_string())),
    }
}

/// Byte index of a char offset; `None` past the end
pub(crate) fn byte_offset(text: &str, offset: usize) -> Option<usize> {
    if offset == 0 {
        return Some(0);
    }
    text.char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .nth(offset)
}
