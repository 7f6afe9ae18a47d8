//! # Patch Dispatcher
//!
//! Buffers local editor changes and decides when they are translated and
//! emitted as one patch batch.
//!
//! ## Flush policy
//!
//! - Anything other than plain text insert/remove flushes immediately
//! - Typing or deleting a boundary character (space, newline) flushes
//!   immediately
//! - Undo/redo replays flush immediately
//! - Everything else waits for the idle deadline, which restarts on every
//!   new keystroke
//!
//! The dispatcher never sleeps. Callers pass the current instant and ask
//! [`PatchDispatcher::poll`] whether the deadline has passed, so the same
//! state machine runs under a tokio timer or a virtual clock.

use std::sync::Arc;

use blocksync_model::{is_text_only, BlockSchema, ChangeOrigin, DocumentSnapshot, EditorChange, Operation, Patch, Selection};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::config::SyncConfig;
use crate::translator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebounceState {
    Idle,
    Buffering { deadline: Instant },
}

/// What the caller should do after pushing a change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushDecision {
    Immediate,
    Deferred(Instant),
}

/// A local change waiting to be translated
#[derive(Debug, Clone)]
pub struct PendingChange {
    pub pre_snapshot: Arc<DocumentSnapshot>,
    pub pre_selection: Option<Selection>,
    pub change: EditorChange,
    /// Last known external value when the change was made
    pub external: Value,
    pub origin: ChangeOrigin,
}

/// One emitted batch and the state it was made from
#[derive(Debug, Clone)]
pub struct FlushReport {
    pub patches: Vec<Patch>,
    /// Snapshot before the first buffered change
    pub pre_snapshot: Arc<DocumentSnapshot>,
    pub pre_selection: Option<Selection>,
    /// Snapshot after the last buffered change
    pub post_snapshot: Arc<DocumentSnapshot>,
    pub selection: Option<Selection>,
    pub origin: ChangeOrigin,
}

pub struct PatchDispatcher {
    buffer: Vec<PendingChange>,
    state: DebounceState,
    config: SyncConfig,
    schema: BlockSchema,
}

impl PatchDispatcher {
    pub fn new(config: &SyncConfig, schema: BlockSchema) -> Self {
        Self {
            buffer: Vec::new(),
            state: DebounceState::Idle,
            config: config.clone(),
            schema,
        }
    }

    /// Buffer a change and decide whether it must go out now
    pub fn push(&mut self, pending: PendingChange, now: Instant) -> FlushDecision {
        let immediate = pending.origin.is_replay()
            || !pending.change.is_text_only()
            || self.is_boundary_edit(pending.change.operations());

        trace!(
            operations = pending.change.operations().len(),
            origin = ?pending.origin,
            immediate,
            "Buffered change"
        );
        self.buffer.push(pending);

        if immediate {
            FlushDecision::Immediate
        } else {
            let deadline = now + self.config.debounce();
            self.state = DebounceState::Buffering { deadline };
            FlushDecision::Deferred(deadline)
        }
    }

    fn is_boundary_edit(&self, operations: &[Operation]) -> bool {
        operations
            .iter()
            .find_map(Operation::text)
            .is_some_and(|text| self.config.is_boundary_text(text))
    }

    /// True when a deferred flush is due
    pub fn poll(&self, now: Instant) -> bool {
        match self.state {
            DebounceState::Buffering { deadline } => now >= deadline,
            DebounceState::Idle => false,
        }
    }

    /// Flush only if the idle deadline has passed
    pub fn flush_due(&mut self, now: Instant) -> Option<FlushReport> {
        if self.poll(now) {
            self.flush_now()
        } else {
            None
        }
    }

    /// Translate and drain everything buffered. Returns `None` when there was
    /// nothing to emit; the buffer is cleared either way.
    pub fn flush_now(&mut self) -> Option<FlushReport> {
        self.state = DebounceState::Idle;
        let buffer = std::mem::take(&mut self.buffer);

        let first = buffer.first()?;
        let last = buffer.last()?;

        let mut patches = Vec::new();
        let mut run_start = 0;
        for (index, pending) in buffer.iter().enumerate() {
            if let Some(next) = buffer.get(index + 1) {
                // The next change carries this one's text forward: fold them
                // into one translation
                let combined: Vec<Operation> = pending
                    .change
                    .operations()
                    .iter()
                    .chain(next.change.operations())
                    .cloned()
                    .collect();
                if is_text_only(&combined) {
                    continue;
                }
            }

            let run = &buffer[run_start..=index];
            run_start = index + 1;
            patches.extend(self.translate_run(run));
        }

        debug!(
            changes = buffer.len(),
            patches = patches.len(),
            origin = ?last.origin,
            "Flushed dispatcher"
        );

        if patches.is_empty() {
            return None;
        }

        Some(FlushReport {
            patches,
            pre_snapshot: first.pre_snapshot.clone(),
            pre_selection: first.pre_selection.clone(),
            post_snapshot: last.change.snapshot().clone(),
            selection: last.change.selection().cloned(),
            origin: last.origin,
        })
    }

    fn translate_run(&self, run: &[PendingChange]) -> Vec<Patch> {
        let (Some(first), Some(last)) = (run.first(), run.last()) else {
            return vec![];
        };

        if run.len() == 1 {
            return translator::change_to_patches(&first.pre_snapshot, &first.change, &first.external, &self.schema);
        }

        let operations: Vec<Operation> = run
            .iter()
            .flat_map(|p| p.change.operations().iter().cloned())
            .collect();
        translator::operations_to_patches(
            &first.pre_snapshot,
            &operations,
            last.change.snapshot(),
            &first.external,
            &self.schema,
        )
    }

    /// Raw operations of buffered changes, oldest first
    pub fn buffered_operations(&self) -> impl Iterator<Item = &Operation> {
        self.buffer.iter().flat_map(|p| p.change.operations())
    }

    /// Replace the buffer with one change that starts from `base`. Used after
    /// buffered operations were replayed on top of a rebuilt snapshot, so the
    /// next flush diffs against the external value the edits now sit on. The
    /// idle deadline is kept.
    pub fn rebase(
        &mut self,
        base: Arc<DocumentSnapshot>,
        replayed: Arc<DocumentSnapshot>,
        external: Value,
        selection: Option<Selection>,
    ) {
        let Some(last) = self.buffer.last() else {
            return;
        };
        let origin = last.origin;
        let operations: Vec<Operation> = self.buffered_operations().cloned().collect();

        debug!(changes = self.buffer.len(), operations = operations.len(), "Rebased buffered changes");
        self.buffer = vec![PendingChange {
            pre_snapshot: base,
            pre_selection: selection.clone(),
            change: EditorChange::from_parts(operations, replayed, selection),
            external,
            origin,
        }];
    }

    /// Drop buffered changes without emitting them
    pub fn discard(&mut self) -> usize {
        self.state = DebounceState::Idle;
        let dropped = self.buffer.len();
        self.buffer.clear();
        dropped
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn state(&self) -> DebounceState {
        self.state
    }

    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            DebounceState::Buffering { deadline } => Some(deadline),
            DebounceState::Idle => None,
        }
    }
}
