//! # Text Deltas
//!
//! Char-level edit scripts carried by `diffMatchPatch` patches.
//!
//! A delta is a sequence of `retain`, `delete` and `insert` ops that walks the
//! old text from start to end. Deletions carry the removed text so that a
//! strict application can verify the delta still matches its target, the same
//! way diff-match-patch verifies hunk context.

use imara_diff::{Algorithm, Diff, Hunk, InternedInput};
use serde::{Deserialize, Serialize};

use crate::ModelError;

/// One step of a text delta
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeltaOp {
    /// Keep the next `n` chars
    Retain(usize),
    /// Remove the given text
    Delete(String),
    /// Insert the given text
    Insert(String),
}

/// An individual insertion or removal at an absolute char offset in the text
/// being edited, as produced by [`TextDelta::edits`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextEdit {
    Insert { offset: usize, text: String },
    Remove { offset: usize, text: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TextDelta {
    ops: Vec<DeltaOp>,
}

impl TextDelta {
    pub fn new(ops: Vec<DeltaOp>) -> Self {
        let mut delta = Self::default();
        for op in ops {
            delta.push(op);
        }
        delta
    }

    /// Compute the delta turning `before` into `after` using a Myers char diff
    pub fn compute(before: &str, after: &str) -> Self {
        let mut delta = Self::default();
        if before == after {
            return delta;
        }

        let mut input: InternedInput<char> = InternedInput::default();
        input.update_before(before.chars());
        input.update_after(after.chars());
        let diff = Diff::compute(Algorithm::Myers, &input);

        let before_chars: Vec<char> = before.chars().collect();
        let after_chars: Vec<char> = after.chars().collect();
        let mut pos = 0usize;

        for Hunk { before: removed, after: added } in diff.hunks() {
            let start = removed.start as usize;
            delta.push(DeltaOp::Retain(start - pos));
            delta.push(DeltaOp::Delete(
                before_chars[start..removed.end as usize].iter().collect(),
            ));
            delta.push(DeltaOp::Insert(
                after_chars[added.start as usize..added.end as usize].iter().collect(),
            ));
            pos = removed.end as usize;
        }

        delta.push(DeltaOp::Retain(before_chars.len() - pos));
        delta.trim_trailing_retain();
        delta
    }

    /// Append an op, merging with the previous op of the same kind and
    /// dropping empty ops
    pub fn push(&mut self, op: DeltaOp) {
        let empty = match &op {
            DeltaOp::Retain(n) => *n == 0,
            DeltaOp::Delete(text) | DeltaOp::Insert(text) => text.is_empty(),
        };
        if empty {
            return;
        }

        match (self.ops.last_mut(), op) {
            (Some(DeltaOp::Retain(a)), DeltaOp::Retain(b)) => *a = a.saturating_add(b),
            (Some(DeltaOp::Delete(a)), DeltaOp::Delete(b)) => a.push_str(&b),
            (Some(DeltaOp::Insert(a)), DeltaOp::Insert(b)) => a.push_str(&b),
            (_, op) => self.ops.push(op),
        }
    }

    fn trim_trailing_retain(&mut self) {
        if matches!(self.ops.last(), Some(DeltaOp::Retain(_))) {
            self.ops.pop();
        }
    }

    pub fn ops(&self) -> &[DeltaOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Number of chars of the source text this delta covers, or `None` when
    /// the retains overflow
    pub fn source_len(&self) -> Option<usize> {
        self.ops.iter().try_fold(0usize, |len, op| match op {
            DeltaOp::Retain(n) => len.checked_add(*n),
            DeltaOp::Delete(text) => len.checked_add(text.chars().count()),
            DeltaOp::Insert(_) => Some(len),
        })
    }

    /// Flatten the delta into sequential edits. Offsets account for edits
    /// already applied earlier in the list, so applying the edits in order
    /// to the source text yields the target text.
    pub fn edits(&self) -> Vec<TextEdit> {
        let mut edits = Vec::new();
        let mut cursor = 0usize;

        for op in &self.ops {
            match op {
                DeltaOp::Retain(n) => cursor = cursor.saturating_add(*n),
                DeltaOp::Delete(text) => edits.push(TextEdit::Remove {
                    offset: cursor,
                    text: text.clone(),
                }),
                DeltaOp::Insert(text) => {
                    edits.push(TextEdit::Insert {
                        offset: cursor,
                        text: text.clone(),
                    });
                    cursor = cursor.saturating_add(text.chars().count());
                }
            }
        }

        edits
    }

    /// Apply the delta, verifying that deleted text matches
    pub fn apply(&self, key: &str, text: &str) -> Result<String, ModelError> {
        let chars: Vec<char> = text.chars().collect();
        let source_len = self.source_len().unwrap_or(usize::MAX);
        if source_len > chars.len() {
            return Err(ModelError::OffsetOutOfRange {
                key: key.to_string(),
                offset: source_len,
                len: chars.len(),
            });
        }

        let mut out = String::with_capacity(text.len());
        let mut pos = 0usize;
        for op in &self.ops {
            match op {
                DeltaOp::Retain(n) => {
                    out.extend(&chars[pos..pos + n]);
                    pos += n;
                }
                DeltaOp::Delete(expected) => {
                    let n = expected.chars().count();
                    let found: String = chars[pos..pos + n].iter().collect();
                    if &found != expected {
                        return Err(ModelError::TextMismatch {
                            key: key.to_string(),
                            offset: pos,
                            expected: expected.clone(),
                            found,
                        });
                    }
                    pos += n;
                }
                DeltaOp::Insert(inserted) => out.push_str(inserted),
            }
        }
        out.extend(&chars[pos..]);

        Ok(out)
    }

    /// Apply by position only, clamping to the text length. Never fails.
    pub fn apply_lossy(&self, text: &str) -> String {
        let chars: Vec<char> = text.chars().collect();
        let mut out = String::with_capacity(text.len());
        let mut pos = 0usize;

        for op in &self.ops {
            match op {
                DeltaOp::Retain(n) => {
                    let end = pos.saturating_add(*n).min(chars.len());
                    out.extend(&chars[pos..end]);
                    pos = end;
                }
                DeltaOp::Delete(removed) => {
                    pos = pos.saturating_add(removed.chars().count()).min(chars.len());
                }
                DeltaOp::Insert(inserted) => out.push_str(inserted),
            }
        }
        out.extend(&chars[pos..]);

        out
    }
}
