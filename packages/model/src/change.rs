//! Editor changes: an operation log plus the state it produced

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{apply_operation, DocumentSnapshot, ModelError, Operation, Selection};

/// Who produced a change. Passed alongside changes instead of being stored
/// on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChangeOrigin {
    Local,
    /// Synthesized from incoming patches. Never buffered or recorded.
    Remote,
    UndoReplay,
    RedoReplay,
}

impl ChangeOrigin {
    pub fn is_replay(self) -> bool {
        matches!(self, ChangeOrigin::UndoReplay | ChangeOrigin::RedoReplay)
    }
}

/// One discrete user action: the operations and the resulting snapshot and
/// selection. Immutable once built.
#[derive(Debug, Clone)]
pub struct EditorChange {
    operations: Vec<Operation>,
    snapshot: Arc<DocumentSnapshot>,
    selection: Option<Selection>,
}

impl EditorChange {
    /// Apply `operations` to `base` in order. `SetSelection` operations
    /// update the resulting selection.
    pub fn from_operations(
        base: &DocumentSnapshot,
        selection: Option<Selection>,
        operations: Vec<Operation>,
    ) -> Result<Self, ModelError> {
        let mut snapshot = base.clone();
        let mut selection = selection;

        for op in &operations {
            if let Operation::SetSelection { selection: next, .. } = op {
                selection = next.clone();
                continue;
            }
            snapshot = apply_operation(&snapshot, op)?;
        }

        Ok(Self {
            operations,
            snapshot: Arc::new(snapshot),
            selection,
        })
    }

    /// Assemble a change whose snapshot was computed elsewhere
    pub fn from_parts(
        operations: Vec<Operation>,
        snapshot: Arc<DocumentSnapshot>,
        selection: Option<Selection>,
    ) -> Self {
        Self {
            operations,
            snapshot,
            selection,
        }
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn snapshot(&self) -> &Arc<DocumentSnapshot> {
        &self.snapshot
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    /// True when every non-selection operation is a plain text edit
    pub fn is_text_only(&self) -> bool {
        is_text_only(&self.operations)
    }

    /// The last selection operation, if the change moved the selection
    pub fn selection_operation(&self) -> Option<&Operation> {
        self.operations.iter().rev().find(|op| op.is_selection())
    }
}

/// True when `operations` contains at least one text edit and nothing but
/// text edits and selection moves
pub fn is_text_only(operations: &[Operation]) -> bool {
    let mut saw_text = false;
    for op in operations {
        if op.is_text_edit() {
            saw_text = true;
        } else if !op.is_selection() {
            return false;
        }
    }
    saw_text
}
