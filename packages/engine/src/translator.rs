//! # Change Translation
//!
//! Converts editor changes into patches and patches back into editor changes.
//!
//! ## Change → patches
//!
//! - Text edits confined to one span become a single `diffMatchPatch` on
//!   that span's text
//! - Other changes are diffed block by block, keyed: removed blocks are
//!   unset, new blocks are inserted next to a surviving neighbour, changed
//!   blocks get field/span level patches
//! - When the last known external value no longer matches the snapshot the
//!   change started from, or blocks were reordered, the whole document is set
//!
//! ## Patches → change
//!
//! Patches are resolved in order against a working snapshot. Each patch is
//! expanded into the primitive operations that reproduce it, so the
//! resulting change can be inverted like any editor change.

use std::sync::Arc;

use blocksync_model::{
    apply_operation, display_path, value, Block, BlockBody, BlockSchema, DocumentSnapshot, EditorChange,
    InsertPosition, Locator, NodeLocation, Operation, Patch, PatchKind, Selection, Span, TextDelta, TextEdit,
};
use serde_json::Value;
use tracing::{debug, warn};

use crate::selection_restore;
use crate::{ReplayFailure, TranslationError};

/// How unresolvable patches are handled by [`patches_to_change`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyMode {
    /// Fail on the first patch that does not resolve
    Strict,
    /// Skip patches that do not resolve. Text deltas apply by position,
    /// clamped to the span's text.
    BestEffort,
}

/// Translate one editor change into patches against the external value
pub fn change_to_patches(
    pre: &DocumentSnapshot,
    change: &EditorChange,
    external: &Value,
    schema: &BlockSchema,
) -> Vec<Patch> {
    operations_to_patches(pre, change.operations(), change.snapshot(), external, schema)
}

/// Translate an operation log that took `pre` to `post`
pub fn operations_to_patches(
    pre: &DocumentSnapshot,
    operations: &[Operation],
    post: &DocumentSnapshot,
    external: &Value,
    schema: &BlockSchema,
) -> Vec<Patch> {
    let external_keys = value::external_block_keys(external);

    if post.is_empty() {
        if external_keys.is_empty() {
            return vec![];
        }
        return vec![Patch::unset(vec![])];
    }

    if external_keys.is_empty() || !external_keys.iter().copied().eq(pre.block_keys()) {
        debug!(
            external_blocks = external_keys.len(),
            snapshot_blocks = pre.len(),
            "External value out of step, setting whole document"
        );
        return vec![set_document(post, schema)];
    }

    if let Some(span_key) = single_text_span(operations) {
        if let Some(patch) = span_text_patch(pre, post, span_key) {
            return patch.into_iter().collect();
        }
    }

    diff_blocks(pre, post, schema)
}

/// The span targeted by a change made only of text edits on that span
fn single_text_span(operations: &[Operation]) -> Option<&str> {
    if !blocksync_model::is_text_only(operations) {
        return None;
    }

    let mut keys = operations.iter().filter(|op| op.is_text_edit()).filter_map(Operation::target_key);
    let first = keys.next()?;
    if keys.all(|key| key == first) {
        Some(first)
    } else {
        None
    }
}

/// `Some(None)` when the span exists on both sides but its text did not change
fn span_text_patch(pre: &DocumentSnapshot, post: &DocumentSnapshot, span_key: &str) -> Option<Option<Patch>> {
    let before = pre.span(span_key)?;
    let after = post.span(span_key)?;
    let block_key = post.top_level_key(span_key)?;
    if pre.top_level_key(span_key) != Some(block_key) {
        return None;
    }

    let delta = TextDelta::compute(&before.text, &after.text);
    if delta.is_empty() {
        return Some(None);
    }
    Some(Some(Patch::diff_match_patch(span_path(block_key, span_key, "text"), delta)))
}

fn diff_blocks(pre: &DocumentSnapshot, post: &DocumentSnapshot, schema: &BlockSchema) -> Vec<Patch> {
    let surviving_pre: Vec<&str> = pre.block_keys().filter(|k| post.block(k).is_some()).collect();
    let surviving_post: Vec<&str> = post.block_keys().filter(|k| pre.block(k).is_some()).collect();

    if surviving_pre.is_empty() || surviving_pre != surviving_post {
        return vec![set_document(post, schema)];
    }

    let mut patches = Vec::new();

    for key in pre.block_keys().filter(|k| post.block(k).is_none()) {
        patches.push(Patch::unset(vec![Locator::key(key)]));
    }

    let blocks = post.blocks();
    let mut i = 0;
    while i < blocks.len() {
        if pre.block(&blocks[i].key).is_some() {
            i += 1;
            continue;
        }

        let start = i;
        while i < blocks.len() && pre.block(&blocks[i].key).is_none() {
            i += 1;
        }
        let items = blocks[start..i]
            .iter()
            .map(|b| value::block_to_value(b, schema))
            .collect();

        // Runs are maximal, so the neighbours on either side survived
        let patch = if start > 0 {
            Patch::insert(vec![Locator::key(&blocks[start - 1].key)], InsertPosition::After, items)
        } else {
            Patch::insert(vec![Locator::key(&blocks[i].key)], InsertPosition::Before, items)
        };
        patches.push(patch);
    }

    for key in surviving_post {
        if let (Some(before), Some(after)) = (pre.block(key), post.block(key)) {
            block_patches(before, after, schema, &mut patches);
        }
    }

    patches
}

fn block_patches(before: &Block, after: &Block, schema: &BlockSchema, patches: &mut Vec<Patch>) {
    if before == after {
        return;
    }

    let key = after.key.as_str();

    match (&before.body, &after.body) {
        (_, _) if before.block_type != after.block_type => {
            patches.push(Patch::set(vec![Locator::key(key)], value::block_to_value(after, schema)));
        }

        (BlockBody::Object { fields: old }, BlockBody::Object { fields: new }) => {
            for name in old.keys().filter(|name| !new.contains_key(*name)) {
                patches.push(Patch::unset(vec![Locator::key(key), Locator::field(name)]));
            }
            for (name, value) in new {
                if old.get(name) != Some(value) {
                    patches.push(Patch::set(vec![Locator::key(key), Locator::field(name)], value.clone()));
                }
            }
        }

        (
            BlockBody::Text { style: old_style, spans: old_spans },
            BlockBody::Text { style: new_style, spans: new_spans },
        ) => {
            if old_style != new_style {
                patches.push(Patch::set(
                    vec![Locator::key(key), Locator::field("style")],
                    Value::String(new_style.clone()),
                ));
            }

            let same_keys = old_spans.len() == new_spans.len()
                && old_spans.iter().zip(new_spans).all(|(a, b)| a.key == b.key);

            if !same_keys {
                let children = new_spans.iter().map(|s| value::span_to_value(s, schema)).collect();
                patches.push(Patch::set(
                    vec![Locator::key(key), Locator::field("children")],
                    Value::Array(children),
                ));
                return;
            }

            for (old, new) in old_spans.iter().zip(new_spans) {
                if old.text != new.text {
                    let delta = TextDelta::compute(&old.text, &new.text);
                    patches.push(Patch::diff_match_patch(span_path(key, &new.key, "text"), delta));
                }
                if old.marks != new.marks {
                    let marks = new.marks.iter().cloned().map(Value::String).collect();
                    patches.push(Patch::set(span_path(key, &new.key, "marks"), Value::Array(marks)));
                }
            }
        }

        // Same type name, different body kind: the schema changed under us
        _ => patches.push(Patch::set(vec![Locator::key(key)], value::block_to_value(after, schema))),
    }
}

fn set_document(snapshot: &DocumentSnapshot, schema: &BlockSchema) -> Patch {
    Patch::set(vec![], value::serialize(snapshot, schema))
}

fn span_path(block_key: &str, span_key: &str, field: &str) -> Vec<Locator> {
    vec![
        Locator::key(block_key),
        Locator::field("children"),
        Locator::key(span_key),
        Locator::field(field),
    ]
}

/// Apply patches in order to `snapshot`, synthesizing the editor
/// operations that reach the patched state
pub fn patches_to_change(
    patches: &[Patch],
    snapshot: &DocumentSnapshot,
    selection: Option<&Selection>,
    schema: &BlockSchema,
    mode: ApplyMode,
) -> Result<EditorChange, TranslationError> {
    let mut current = snapshot.clone();
    let mut operations = Vec::new();

    for patch in patches {
        let result = patch_operations(&current, patch, schema, mode).and_then(|ops| {
            let mut next = current.clone();
            for op in &ops {
                next = apply_operation(&next, op)?;
            }
            Ok((next, ops))
        });

        match result {
            Ok((next, ops)) => {
                current = next;
                operations.extend(ops);
            }
            Err(err) if mode == ApplyMode::BestEffort => {
                warn!(path = %display_path(&patch.path), patch_type = patch.type_name(), error = %err, "Skipping unresolvable patch");
            }
            Err(err) => return Err(err),
        }
    }

    debug!(patches = patches.len(), operations = operations.len(), "Translated patches to change");

    let selection = selection.and_then(|s| selection_restore::restore(&current, s, patches).ok());
    Ok(EditorChange::from_parts(operations, Arc::new(current), selection))
}

/// Re-apply buffered raw operations on top of a rebuilt snapshot
pub fn replay_operations(
    snapshot: &DocumentSnapshot,
    operations: &[Operation],
) -> Result<DocumentSnapshot, ReplayFailure> {
    let mut current = snapshot.clone();
    for op in operations {
        current = apply_operation(&current, op).map_err(|source| ReplayFailure {
            dropped: operations.len(),
            source,
        })?;
    }
    Ok(current)
}

fn unresolved(patch: &Patch, reason: impl Into<String>) -> TranslationError {
    TranslationError::UnresolvedPath {
        path: display_path(&patch.path),
        reason: reason.into(),
    }
}

fn unsupported(patch: &Patch) -> TranslationError {
    TranslationError::Unsupported {
        patch_type: patch.type_name().to_string(),
        path: display_path(&patch.path),
    }
}

/// Operations reproducing one patch against `current`
fn patch_operations(
    current: &DocumentSnapshot,
    patch: &Patch,
    schema: &BlockSchema,
    mode: ApplyMode,
) -> Result<Vec<Operation>, TranslationError> {
    let path = patch.path.as_slice();

    match path {
        [] => match &patch.kind {
            PatchKind::Set { value } => {
                let next = value::deserialize(value, schema)?;
                let mut ops = remove_all_blocks(current);
                ops.extend(
                    next.into_blocks()
                        .into_iter()
                        .enumerate()
                        .map(|(index, block)| Operation::InsertBlock { index, block }),
                );
                Ok(ops)
            }
            PatchKind::Unset => Ok(remove_all_blocks(current)),
            _ => Err(unsupported(patch)),
        },

        [Locator::Key { key }] => {
            let index = current
                .block_index(key)
                .ok_or_else(|| unresolved(patch, format!("no block {}", key)))?;
            let existing = current.blocks()[index].clone();

            match &patch.kind {
                PatchKind::Set { value } => {
                    let block = value::value_to_block(value, schema)?;
                    Ok(vec![
                        Operation::RemoveBlock { index, block: existing },
                        Operation::InsertBlock { index, block },
                    ])
                }
                PatchKind::Unset => Ok(vec![Operation::RemoveBlock { index, block: existing }]),
                PatchKind::Insert { position, items } => {
                    let blocks = items
                        .iter()
                        .map(|item| value::value_to_block(item, schema))
                        .collect::<Result<Vec<_>, _>>()?;
                    let (mut ops, at) = match position {
                        InsertPosition::Before => (vec![], index),
                        InsertPosition::After => (vec![], index + 1),
                        InsertPosition::Replace => (vec![Operation::RemoveBlock { index, block: existing }], index),
                    };
                    ops.extend(
                        blocks
                            .into_iter()
                            .enumerate()
                            .map(|(offset, block)| Operation::InsertBlock { index: at + offset, block }),
                    );
                    Ok(ops)
                }
                PatchKind::DiffMatchPatch { .. } => Err(unsupported(patch)),
            }
        }

        [Locator::Key { key }, Locator::Field(field)] => {
            let block = current
                .block(key)
                .ok_or_else(|| unresolved(patch, format!("no block {}", key)))?;

            if field == "children" {
                return children_operations(block, patch, schema);
            }

            let previous = blocksync_model::block_data(block, field);
            match &patch.kind {
                PatchKind::Set { value } => Ok(vec![Operation::SetBlockData {
                    key: key.clone(),
                    field: field.clone(),
                    value: Some(value.clone()),
                    previous,
                }]),
                PatchKind::Unset => Ok(vec![Operation::SetBlockData {
                    key: key.clone(),
                    field: field.clone(),
                    value: None,
                    previous,
                }]),
                _ => Err(unsupported(patch)),
            }
        }

        [Locator::Key { key }, Locator::Field(children), Locator::Key { key: span_key }] if children == "children" => {
            let (block, span_index) = resolve_span(current, patch, key, span_key)?;
            let existing = block.spans()[span_index].clone();

            match &patch.kind {
                PatchKind::Set { value } => Ok(vec![
                    Operation::RemoveSpan {
                        block_key: key.clone(),
                        index: span_index,
                        span: existing,
                    },
                    Operation::InsertSpan {
                        block_key: key.clone(),
                        index: span_index,
                        span: value::value_to_span(value, schema)?,
                    },
                ]),
                PatchKind::Unset => Ok(vec![Operation::RemoveSpan {
                    block_key: key.clone(),
                    index: span_index,
                    span: existing,
                }]),
                PatchKind::Insert { position, items } => {
                    let spans = items
                        .iter()
                        .map(|item| value::value_to_span(item, schema))
                        .collect::<Result<Vec<_>, _>>()?;
                    let (mut ops, at) = match position {
                        InsertPosition::Before => (vec![], span_index),
                        InsertPosition::After => (vec![], span_index + 1),
                        InsertPosition::Replace => (
                            vec![Operation::RemoveSpan {
                                block_key: key.clone(),
                                index: span_index,
                                span: existing,
                            }],
                            span_index,
                        ),
                    };
                    ops.extend(spans.into_iter().enumerate().map(|(offset, span)| Operation::InsertSpan {
                        block_key: key.clone(),
                        index: at + offset,
                        span,
                    }));
                    Ok(ops)
                }
                PatchKind::DiffMatchPatch { .. } => Err(unsupported(patch)),
            }
        }

        [Locator::Key { key }, Locator::Field(children), Locator::Key { key: span_key }, Locator::Field(field)]
            if children == "children" =>
        {
            let (block, span_index) = resolve_span(current, patch, key, span_key)?;
            let span = &block.spans()[span_index];

            match (field.as_str(), &patch.kind) {
                ("text", PatchKind::Set { value }) => {
                    let text = value
                        .as_str()
                        .ok_or_else(|| unresolved(patch, "text must be a string"))?;
                    Ok(text_operations(span_key, &span.text, text))
                }
                ("text", PatchKind::Unset) => Ok(text_operations(span_key, &span.text, "")),
                ("text", PatchKind::DiffMatchPatch { value: delta }) => {
                    let text = match mode {
                        ApplyMode::Strict => delta.apply(span_key, &span.text)?,
                        ApplyMode::BestEffort => delta.apply_lossy(&span.text),
                    };
                    Ok(text_operations(span_key, &span.text, &text))
                }
                ("marks", PatchKind::Set { value }) => {
                    let marks = value
                        .as_array()
                        .ok_or_else(|| unresolved(patch, "marks must be an array"))?
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect();
                    Ok(vec![Operation::SetMarks {
                        key: span_key.clone(),
                        marks,
                        previous: span.marks.clone(),
                    }])
                }
                ("marks", PatchKind::Unset) => Ok(vec![Operation::SetMarks {
                    key: span_key.clone(),
                    marks: Default::default(),
                    previous: span.marks.clone(),
                }]),
                _ => Err(unsupported(patch)),
            }
        }

        _ => Err(unsupported(patch)),
    }
}

fn resolve_span<'a>(
    current: &'a DocumentSnapshot,
    patch: &Patch,
    block_key: &str,
    span_key: &str,
) -> Result<(&'a Block, usize), TranslationError> {
    let block_index = current
        .block_index(block_key)
        .ok_or_else(|| unresolved(patch, format!("no block {}", block_key)))?;

    match current.locate(span_key) {
        Some(NodeLocation::Span { block, span }) if block == block_index => Ok((&current.blocks()[block], span)),
        _ => Err(unresolved(patch, format!("no span {} in block {}", span_key, block_key))),
    }
}

fn children_operations(block: &Block, patch: &Patch, schema: &BlockSchema) -> Result<Vec<Operation>, TranslationError> {
    if !block.is_text() {
        return Err(unresolved(patch, format!("block {} has no children", block.key)));
    }

    let new_spans: Vec<Span> = match &patch.kind {
        PatchKind::Set { value } => value
            .as_array()
            .ok_or_else(|| unresolved(patch, "children must be an array"))?
            .iter()
            .map(|item| value::value_to_span(item, schema))
            .collect::<Result<_, _>>()?,
        PatchKind::Unset => vec![],
        _ => return Err(unsupported(patch)),
    };

    let mut ops: Vec<Operation> = block
        .spans()
        .iter()
        .enumerate()
        .rev()
        .map(|(index, span)| Operation::RemoveSpan {
            block_key: block.key.clone(),
            index,
            span: span.clone(),
        })
        .collect();
    ops.extend(new_spans.into_iter().enumerate().map(|(index, span)| Operation::InsertSpan {
        block_key: block.key.clone(),
        index,
        span,
    }));
    Ok(ops)
}

fn remove_all_blocks(current: &DocumentSnapshot) -> Vec<Operation> {
    current
        .blocks()
        .iter()
        .enumerate()
        .rev()
        .map(|(index, block)| Operation::RemoveBlock {
            index,
            block: block.clone(),
        })
        .collect()
}

/// Minimal insert/remove operations turning `before` into `after`
fn text_operations(key: &str, before: &str, after: &str) -> Vec<Operation> {
    TextDelta::compute(before, after)
        .edits()
        .into_iter()
        .map(|edit| match edit {
            TextEdit::Insert { offset, text } => Operation::InsertText {
                key: key.to_string(),
                offset,
                text,
            },
            TextEdit::Remove { offset, text } => Operation::RemoveText {
                key: key.to_string(),
                offset,
                text,
            },
        })
        .collect()
}
