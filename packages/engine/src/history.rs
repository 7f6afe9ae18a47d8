//! # Undo/Redo History
//!
//! Records emitted local patch batches and turns them back into editor
//! changes on undo and redo.
//!
//! ## Design
//!
//! - Each entry keeps the emitted patches and the snapshot they were made from
//! - Undo re-derives the forward operations from the patches, inverts them
//!   and applies the result to the current snapshot
//! - Redo re-derives the forward operations and applies them again
//! - Recording a new entry clears the redo stack
//! - Both stacks are bounded; the oldest entry is evicted first
//!
//! Emissions are not recorded when they are themselves undo/redo replays, or
//! when any patch path is longer than `undo_max_path_len`. With the default
//! of 1, only whole-document and whole-block patches are recorded; span text
//! and field patches (path length 2 or more) are left out.

use std::collections::VecDeque;
use std::sync::Arc;

use blocksync_model::{
    invert_operations, BlockSchema, ChangeOrigin, DocumentSnapshot, EditorChange, Operation, Patch, Selection,
};
use tracing::{debug, trace};

use crate::config::SyncConfig;
use crate::translator::{self, ApplyMode};
use crate::TranslationError;

/// One undoable emission
#[derive(Debug, Clone)]
pub struct UndoEntry {
    pub patches: Vec<Patch>,
    pub pre_snapshot: Arc<DocumentSnapshot>,
    /// Selection before the edit, restored by undo
    pub pre_selection: Option<Selection>,
    /// Selection after the edit, restored by redo
    pub selection: Option<Selection>,
}

#[derive(Debug, Clone)]
pub enum HistoryStep {
    /// The change to apply to the current snapshot
    Applied(EditorChange),
    EmptyStack,
}

pub struct UndoRedoManager {
    undo_stack: VecDeque<UndoEntry>,
    redo_stack: VecDeque<UndoEntry>,
    /// Maximum entries per stack (0 = unlimited)
    limit: usize,
    max_path_len: usize,
    schema: BlockSchema,
}

impl UndoRedoManager {
    pub fn new(config: &SyncConfig, schema: BlockSchema) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: VecDeque::new(),
            limit: config.undo_limit,
            max_path_len: config.undo_max_path_len,
            schema,
        }
    }

    /// Record an emitted batch. Returns whether it was recorded.
    pub fn record_local_edit(&mut self, entry: UndoEntry, origin: ChangeOrigin) -> bool {
        if origin != ChangeOrigin::Local {
            trace!(?origin, "Not recording non-local change");
            return false;
        }

        if let Some(patch) = entry.patches.iter().find(|p| p.path.len() > self.max_path_len) {
            trace!(path_len = patch.path.len(), "Not recording nested patch batch");
            return false;
        }

        Self::push_bounded(&mut self.undo_stack, entry, self.limit);
        self.redo_stack.clear();
        debug!(undo_levels = self.undo_stack.len(), "Recorded undo entry");
        true
    }

    fn push_bounded(stack: &mut VecDeque<UndoEntry>, entry: UndoEntry, limit: usize) {
        stack.push_back(entry);
        if limit > 0 && stack.len() > limit {
            stack.pop_front();
        }
    }

    /// Undo the most recent entry against `current`
    pub fn undo(&mut self, current: &DocumentSnapshot) -> Result<HistoryStep, TranslationError> {
        let Some(entry) = self.undo_stack.pop_back() else {
            return Ok(HistoryStep::EmptyStack);
        };

        match self.inverse_change(&entry, current) {
            Ok(change) => {
                Self::push_bounded(&mut self.redo_stack, entry, self.limit);
                Ok(HistoryStep::Applied(change))
            }
            Err(err) => {
                self.undo_stack.push_back(entry);
                Err(err)
            }
        }
    }

    /// Redo the most recently undone entry against `current`
    pub fn redo(&mut self, current: &DocumentSnapshot) -> Result<HistoryStep, TranslationError> {
        let Some(entry) = self.redo_stack.pop_back() else {
            return Ok(HistoryStep::EmptyStack);
        };

        match self.forward_change(&entry, current) {
            Ok(change) => {
                Self::push_bounded(&mut self.undo_stack, entry, self.limit);
                Ok(HistoryStep::Applied(change))
            }
            Err(err) => {
                self.redo_stack.push_back(entry);
                Err(err)
            }
        }
    }

    fn forward_operations(&self, entry: &UndoEntry) -> Result<Vec<Operation>, TranslationError> {
        let forward = translator::patches_to_change(
            &entry.patches,
            &entry.pre_snapshot,
            None,
            &self.schema,
            ApplyMode::Strict,
        )?;
        Ok(forward.operations().to_vec())
    }

    fn inverse_change(&self, entry: &UndoEntry, current: &DocumentSnapshot) -> Result<EditorChange, TranslationError> {
        let mut operations = invert_operations(&self.forward_operations(entry)?);
        operations.push(Operation::SetSelection {
            selection: entry.pre_selection.clone(),
            previous: entry.selection.clone(),
        });
        Ok(EditorChange::from_operations(current, None, operations)?)
    }

    fn forward_change(&self, entry: &UndoEntry, current: &DocumentSnapshot) -> Result<EditorChange, TranslationError> {
        let mut operations = self.forward_operations(entry)?;
        operations.push(Operation::SetSelection {
            selection: entry.selection.clone(),
            previous: entry.pre_selection.clone(),
        });
        Ok(EditorChange::from_operations(current, None, operations)?)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_levels(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_levels(&self) -> usize {
        self.redo_stack.len()
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blocksync_model::{Block, InsertPosition, Locator, Span};

    fn doc() -> Arc<DocumentSnapshot> {
        Arc::new(DocumentSnapshot::new(vec![Block::text("b1", vec![Span::new("s1", "Hello")])]).unwrap())
    }

    fn insert_block_entry(pre: &Arc<DocumentSnapshot>, key: &str) -> (UndoEntry, Arc<DocumentSnapshot>) {
        let after = pre.blocks().last().map(|b| b.key.clone()).unwrap();
        let block = Block::text(key, vec![Span::new(format!("{}-s", key), "new")]);
        let patches = vec![Patch::insert(
            vec![Locator::key(after)],
            InsertPosition::After,
            vec![blocksync_model::value::block_to_value(&block, &BlockSchema::default())],
        )];
        let post = translator::patches_to_change(&patches, pre, None, &BlockSchema::default(), ApplyMode::Strict)
            .unwrap()
            .snapshot()
            .clone();

        (
            UndoEntry {
                patches,
                pre_snapshot: pre.clone(),
                pre_selection: Some(Selection::caret("s1", 5)),
                selection: Some(Selection::caret(format!("{}-s", key), 0)),
            },
            post,
        )
    }

    fn manager() -> UndoRedoManager {
        UndoRedoManager::new(&SyncConfig::default(), BlockSchema::default())
    }

    #[test]
    fn test_undo_empty_stack() {
        let mut history = manager();
        assert!(matches!(history.undo(&doc()).unwrap(), HistoryStep::EmptyStack));
        assert!(matches!(history.redo(&doc()).unwrap(), HistoryStep::EmptyStack));
    }

    #[test]
    fn test_undo_then_redo() {
        let mut history = manager();
        let pre = doc();
        let (entry, post) = insert_block_entry(&pre, "b2");

        assert!(history.record_local_edit(entry, ChangeOrigin::Local));

        let undone = match history.undo(&post).unwrap() {
            HistoryStep::Applied(change) => change,
            HistoryStep::EmptyStack => panic!("Expected an undo change"),
        };
        assert_eq!(**undone.snapshot(), *pre);
        assert_eq!(undone.selection(), Some(&Selection::caret("s1", 5)));
        assert_eq!(history.redo_levels(), 1);

        let redone = match history.redo(undone.snapshot()).unwrap() {
            HistoryStep::Applied(change) => change,
            HistoryStep::EmptyStack => panic!("Expected a redo change"),
        };
        assert_eq!(**redone.snapshot(), *post);
        assert_eq!(redone.selection(), Some(&Selection::caret("b2-s", 0)));
        assert_eq!(history.undo_levels(), 1);
        assert_eq!(history.redo_levels(), 0);
    }

    #[test]
    fn test_replay_and_nested_patches_not_recorded() {
        let mut history = manager();
        let pre = doc();
        let (entry, _) = insert_block_entry(&pre, "b2");
        assert!(!history.record_local_edit(entry.clone(), ChangeOrigin::UndoReplay));
        assert!(!history.record_local_edit(entry, ChangeOrigin::Remote));

        let nested = UndoEntry {
            patches: vec![Patch::set(vec![Locator::key("b1"), Locator::field("style")], "h1".into())],
            pre_snapshot: pre.clone(),
            pre_selection: None,
            selection: None,
        };
        assert!(!history.record_local_edit(nested, ChangeOrigin::Local));
        assert!(!history.can_undo());
    }

    #[test]
    fn test_new_edit_clears_redo() {
        let mut history = manager();
        let pre = doc();
        let (entry, post) = insert_block_entry(&pre, "b2");
        history.record_local_edit(entry, ChangeOrigin::Local);
        history.undo(&post).unwrap();
        assert!(history.can_redo());

        let (entry, _) = insert_block_entry(&pre, "b3");
        history.record_local_edit(entry, ChangeOrigin::Local);
        assert!(!history.can_redo());
    }

    #[test]
    fn test_limit_evicts_oldest() {
        let config = SyncConfig {
            undo_limit: 2,
            ..SyncConfig::default()
        };
        let mut history = UndoRedoManager::new(&config, BlockSchema::default());

        let mut current = doc();
        for key in ["b2", "b3", "b4"] {
            let (entry, post) = insert_block_entry(&current, key);
            history.record_local_edit(entry, ChangeOrigin::Local);
            current = post;
        }
        assert_eq!(history.undo_levels(), 2);

        // Only b4 and b3 can be undone
        for _ in 0..2 {
            if let HistoryStep::Applied(change) = history.undo(&current).unwrap() {
                current = change.snapshot().clone();
            }
        }
        let keys: Vec<&str> = current.block_keys().collect();
        assert_eq!(keys, vec!["b1", "b2"]);
        assert!(matches!(history.undo(&current).unwrap(), HistoryStep::EmptyStack));
    }

    #[test]
    fn test_undo_fails_against_diverged_snapshot() {
        let mut history = manager();
        let pre = doc();
        let (entry, _) = insert_block_entry(&pre, "b2");
        history.record_local_edit(entry, ChangeOrigin::Local);

        // b2 never made it into this snapshot
        assert!(history.undo(&pre).is_err());
        assert_eq!(history.undo_levels(), 1);
    }
}
