//! # Sync Engine
//!
//! Owns the current editor snapshot and keeps it in step with the external
//! document value.
//!
//! ## States
//!
//! ```text
//!            external patches
//!   Clean ──────────────────────→ Evaluating
//!     ↑                           │        │
//!     │          trusted          ↓        ↓  resync
//!     └────────────────── TrustedNoResync  Resyncing
//!     └────────────────────────────────────┘
//!
//!   any ── invalid external value ──→ Disabled ── valid value ──→ Resyncing
//! ```
//!
//! Local edits go through the [`PatchDispatcher`]; every emitted batch is
//! offered to the [`UndoRedoManager`] before the engine returns.

use std::collections::BTreeSet;
use std::sync::Arc;

use blocksync_model::{
    classify_value, deserialize, serialize, BlockSchema, ChangeOrigin, DocumentSnapshot, EditorChange, Patch,
    Selection,
};
use serde::Deserialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::config::SyncConfig;
use crate::dispatcher::{FlushDecision, FlushReport, PatchDispatcher, PendingChange};
use crate::history::{HistoryStep, UndoEntry, UndoRedoManager};
use crate::sink::PatchSink;
use crate::translator::{self, ApplyMode};
use crate::{selection_restore, InvalidExternalValue, ReplayFailure, SelectionRestoreFailure, SyncError};

#[derive(Debug, Clone, PartialEq)]
pub enum SyncState {
    /// Snapshot assumed consistent with the external value
    Clean,
    Evaluating,
    TrustedNoResync,
    Resyncing,
    /// The external value cannot be edited
    Disabled(InvalidExternalValue),
}

/// A change notification from the persistence layer
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalNotification {
    #[serde(default)]
    pub patches: Vec<Patch>,
    #[serde(default)]
    pub should_reset: bool,
    /// Authoritative external value, when known
    #[serde(default)]
    pub snapshot: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileDecision {
    /// The snapshot already reflects the patches
    TrustedNoResync,
    /// Rebuilt from the notification's external value
    Resynced,
    /// No external value came with the notification; the patches were
    /// applied to the current snapshot instead
    Patched,
    Disabled,
}

/// What reconciliation did. Failures are reported here, not returned.
#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    pub decision: ReconcileDecision,
    pub selection: Option<Selection>,
    pub selection_error: Option<SelectionRestoreFailure>,
    pub replay_error: Option<ReplayFailure>,
    /// The editor should take focus
    pub focus: bool,
}

impl ReconcileOutcome {
    fn new(decision: ReconcileDecision, selection: Option<Selection>) -> Self {
        Self {
            decision,
            selection,
            selection_error: None,
            replay_error: None,
            focus: false,
        }
    }
}

pub struct SyncEngine<S: PatchSink> {
    snapshot: Arc<DocumentSnapshot>,
    selection: Option<Selection>,
    external: Value,
    dispatcher: PatchDispatcher,
    history: UndoRedoManager,
    config: SyncConfig,
    schema: BlockSchema,
    state: SyncState,
    sink: S,
}

impl<S: PatchSink> SyncEngine<S> {
    /// Build an engine from the initial external value. An invalid value
    /// starts the engine disabled.
    pub fn new(initial: Value, config: SyncConfig, schema: BlockSchema, sink: S) -> Self {
        let (snapshot, state) = match load_value(&initial, &schema) {
            Ok(snapshot) => (snapshot, SyncState::Clean),
            Err(reason) => {
                warn!(error = %reason, "Initial value cannot be edited");
                (DocumentSnapshot::empty(), SyncState::Disabled(reason))
            }
        };

        Self {
            snapshot: Arc::new(snapshot),
            selection: None,
            external: initial,
            dispatcher: PatchDispatcher::new(&config, schema.clone()),
            history: UndoRedoManager::new(&config, schema.clone()),
            config,
            schema,
            state,
            sink,
        }
    }

    fn ensure_enabled(&self) -> Result<(), SyncError> {
        match &self.state {
            SyncState::Disabled(reason) => Err(SyncError::Disabled(reason.clone())),
            _ => Ok(()),
        }
    }

    fn transition(&mut self, next: SyncState) {
        debug!(from = ?self.state, to = ?next, "State transition");
        self.state = next;
    }

    /// Accept a change produced by the editor surface
    pub fn handle_editor_change(&mut self, change: EditorChange, now: Instant) -> Result<FlushDecision, SyncError> {
        self.ensure_enabled()?;
        Ok(self.submit(change, ChangeOrigin::Local, now))
    }

    fn submit(&mut self, change: EditorChange, origin: ChangeOrigin, now: Instant) -> FlushDecision {
        let pending = PendingChange {
            pre_snapshot: self.snapshot.clone(),
            pre_selection: self.selection.clone(),
            change: change.clone(),
            external: self.external.clone(),
            origin,
        };

        self.snapshot = change.snapshot().clone();
        self.selection = change.selection().cloned();

        let decision = self.dispatcher.push(pending, now);
        if decision == FlushDecision::Immediate {
            self.flush_now();
        }
        decision
    }

    /// Flush if the idle deadline has passed. Returns whether a batch went out.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.dispatcher.flush_due(now) {
            Some(report) => {
                self.emit(report);
                true
            }
            None => false,
        }
    }

    /// Flush everything buffered. Returns whether a batch went out.
    pub fn flush_now(&mut self) -> bool {
        match self.dispatcher.flush_now() {
            Some(report) => {
                self.emit(report);
                true
            }
            None => false,
        }
    }

    fn emit(&mut self, report: FlushReport) {
        info!(patches = report.patches.len(), origin = ?report.origin, "Emitting local patches");
        self.sink.emit(report.patches.clone());

        self.history.record_local_edit(
            UndoEntry {
                patches: report.patches,
                pre_snapshot: report.pre_snapshot,
                pre_selection: report.pre_selection,
                selection: report.selection,
            },
            report.origin,
        );

        // The persistence layer applies what we send
        self.external = serialize(&self.snapshot, &self.schema);
    }

    /// Reconcile the snapshot with a change to the external document
    #[instrument(skip(self, notification), fields(patches = notification.patches.len(), should_reset = notification.should_reset))]
    pub fn on_external_patches(&mut self, notification: ExternalNotification) -> ReconcileOutcome {
        let was_disabled = self.is_disabled();
        if was_disabled && notification.snapshot.is_none() {
            debug!("Still disabled, no external value to rebuild from");
            return ReconcileOutcome::new(ReconcileDecision::Disabled, None);
        }

        self.transition(SyncState::Evaluating);

        if let Some(value) = &notification.snapshot {
            if let Some(reason) = check_value(value, &self.schema) {
                return self.disable(reason, value.clone());
            }
        }

        if !was_disabled && !self.needs_resync(&notification) {
            self.transition(SyncState::TrustedNoResync);
            if let Some(value) = notification.snapshot {
                self.external = value;
            }
            self.transition(SyncState::Clean);
            return ReconcileOutcome::new(ReconcileDecision::TrustedNoResync, self.selection.clone());
        }

        self.transition(SyncState::Resyncing);
        let outcome = match notification.snapshot {
            Some(value) => self.resync(value, &notification.patches),
            None => self.apply_incoming(&notification.patches),
        };

        if outcome.decision != ReconcileDecision::Disabled {
            self.transition(SyncState::Clean);
        }
        outcome
    }

    fn needs_resync(&self, notification: &ExternalNotification) -> bool {
        let patches = &notification.patches;
        let policy = &self.config.resync;

        let has_remote = patches.iter().any(Patch::is_remote);
        let has_structural = patches.iter().any(Patch::is_structural);
        let destinations: BTreeSet<&str> = patches.iter().filter_map(Patch::top_level_key).collect();
        let too_many_blocks = destinations.len() > policy.max_trusted_blocks;
        let too_many_patches = patches.len() > policy.max_trusted_patches;

        debug!(
            has_remote,
            has_structural,
            destinations = destinations.len(),
            too_many_patches,
            should_reset = notification.should_reset,
            "Evaluated incoming patches"
        );

        has_remote || has_structural || too_many_blocks || too_many_patches || notification.should_reset
    }

    fn disable(&mut self, reason: InvalidExternalValue, value: Value) -> ReconcileOutcome {
        warn!(error = %reason, "External value cannot be edited, disabling editor");
        let dropped = self.dispatcher.discard();
        if dropped > 0 {
            warn!(dropped, "Dropping buffered local edits");
        }
        self.snapshot = Arc::new(DocumentSnapshot::empty());
        self.selection = None;
        self.external = value;
        self.transition(SyncState::Disabled(reason));
        ReconcileOutcome::new(ReconcileDecision::Disabled, None)
    }

    fn resync(&mut self, value: Value, patches: &[Patch]) -> ReconcileOutcome {
        let mut rebuilt = match deserialize(&value, &self.schema) {
            Ok(snapshot) => snapshot,
            Err(err) => return self.disable(InvalidExternalValue::Malformed(err), value),
        };

        let prior = self.selection.take();
        let mut outcome = ReconcileOutcome::new(ReconcileDecision::Resynced, None);

        if let Some(prior) = &prior {
            match selection_restore::restore(&rebuilt, prior, patches) {
                Ok(selection) => outcome.selection = Some(selection),
                Err(err) => {
                    debug!(error = %err, "Selection not restored");
                    outcome.selection_error = Some(err);
                }
            }
        }

        if !self.dispatcher.is_empty() && patches.iter().all(Patch::is_remote) {
            let buffered: Vec<_> = self.dispatcher.buffered_operations().cloned().collect();
            match translator::replay_operations(&rebuilt, &buffered) {
                Ok(replayed) => {
                    debug!(operations = buffered.len(), "Replayed buffered local edits");
                    let base = Arc::new(std::mem::replace(&mut rebuilt, replayed));
                    self.dispatcher.rebase(
                        base,
                        Arc::new(rebuilt.clone()),
                        value.clone(),
                        outcome.selection.clone(),
                    );
                }
                Err(err) => {
                    warn!(error = %err, "Could not apply pending local operations");
                    self.dispatcher.discard();
                    outcome.replay_error = Some(err);
                }
            }
        }

        outcome.focus = prior
            .as_ref()
            .is_some_and(|p| anchored_in_first_block(&rebuilt, p));

        info!(blocks = rebuilt.len(), "Resynced from external value");
        self.snapshot = Arc::new(rebuilt);
        self.selection = outcome.selection.clone();
        self.external = value;
        outcome
    }

    fn apply_incoming(&mut self, patches: &[Patch]) -> ReconcileOutcome {
        let applied = translator::patches_to_change(
            patches,
            &self.snapshot,
            self.selection.as_ref(),
            &self.schema,
            ApplyMode::BestEffort,
        );

        match applied {
            Ok(change) => self.commit(change, ChangeOrigin::Remote),
            Err(err) => warn!(error = %err, "Could not apply incoming patches"),
        }

        ReconcileOutcome::new(ReconcileDecision::Patched, self.selection.clone())
    }

    /// Undo the most recent recorded emission. Buffered edits are flushed first.
    pub fn undo(&mut self, now: Instant) -> Result<HistoryStep, SyncError> {
        self.ensure_enabled()?;
        self.flush_now();

        let step = self.history.undo(&self.snapshot)?;
        if let HistoryStep::Applied(change) = &step {
            self.submit(change.clone(), ChangeOrigin::UndoReplay, now);
        }
        Ok(step)
    }

    /// Redo the most recently undone emission. Buffered edits are flushed first.
    pub fn redo(&mut self, now: Instant) -> Result<HistoryStep, SyncError> {
        self.ensure_enabled()?;
        self.flush_now();

        let step = self.history.redo(&self.snapshot)?;
        if let HistoryStep::Applied(change) = &step {
            self.submit(change.clone(), ChangeOrigin::RedoReplay, now);
        }
        Ok(step)
    }

    /// Apply patches produced outside the editor surface (toolbar actions,
    /// form inputs) and forward them unchanged
    pub fn apply_form_patches(&mut self, patches: Vec<Patch>) -> Result<(), SyncError> {
        self.ensure_enabled()?;
        self.flush_now();

        let change = translator::patches_to_change(
            &patches,
            &self.snapshot,
            self.selection.as_ref(),
            &self.schema,
            ApplyMode::Strict,
        )?;

        debug!(patches = patches.len(), "Applied form patches");
        self.commit(change, ChangeOrigin::Local);
        self.sink.emit(patches);
        Ok(())
    }

    /// Take a change that did not go through the dispatcher
    fn commit(&mut self, change: EditorChange, origin: ChangeOrigin) {
        debug!(?origin, operations = change.operations().len(), "Committed change");
        self.snapshot = change.snapshot().clone();
        self.selection = change.selection().cloned();
        self.external = serialize(&self.snapshot, &self.schema);
    }

    /// Move the caret without editing
    pub fn set_selection(&mut self, selection: Option<Selection>) {
        self.selection = selection;
    }

    pub fn snapshot(&self) -> &Arc<DocumentSnapshot> {
        &self.snapshot
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self.state, SyncState::Disabled(_))
    }

    pub fn external_value(&self) -> &Value {
        &self.external
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn has_pending(&self) -> bool {
        !self.dispatcher.is_empty()
    }

    /// When the buffered edits will be flushed, if any are waiting
    pub fn deadline(&self) -> Option<Instant> {
        self.dispatcher.deadline()
    }

    pub fn undo_levels(&self) -> usize {
        self.history.undo_levels()
    }

    pub fn redo_levels(&self) -> usize {
        self.history.redo_levels()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }
}

fn check_value(value: &Value, schema: &BlockSchema) -> Option<InvalidExternalValue> {
    if let Some(deprecation) = schema.deprecation() {
        return Some(InvalidExternalValue::DeprecatedSchema(deprecation));
    }
    InvalidExternalValue::from_status(classify_value(value))
}

fn load_value(value: &Value, schema: &BlockSchema) -> Result<DocumentSnapshot, InvalidExternalValue> {
    if let Some(reason) = check_value(value, schema) {
        return Err(reason);
    }
    Ok(deserialize(value, schema)?)
}

fn anchored_in_first_block(snapshot: &DocumentSnapshot, selection: &Selection) -> bool {
    match (snapshot.blocks().first(), snapshot.top_level_key(&selection.anchor.key)) {
        (Some(first), Some(key)) => first.key == key,
        _ => false,
    }
}
