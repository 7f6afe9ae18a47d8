//! Async driver running one engine on a tokio task
//!
//! The task waits for commands with the debounce deadline as timeout, so a
//! deferred flush fires as soon as the editor goes idle.

use std::sync::Arc;

use blocksync_model::{DocumentSnapshot, EditorChange, Selection};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::engine::{ExternalNotification, ReconcileOutcome, SyncEngine};
use crate::history::HistoryStep;
use crate::sink::PatchSink;
use crate::{SessionError, SyncError};

const COMMAND_CAPACITY: usize = 256;

#[derive(Debug)]
pub enum SessionCommand {
    Edit(EditorChange),
    External(ExternalNotification),
    Undo,
    Redo,
    Flush,
    Shutdown,
}

/// Sent back to the editor surface
#[derive(Debug, Clone)]
pub enum SessionUpdate {
    /// The engine replaced the snapshot (undo, redo, resync)
    Snapshot {
        snapshot: Arc<DocumentSnapshot>,
        selection: Option<Selection>,
    },
    Reconciled(ReconcileOutcome),
}

pub struct SessionHandle<S: PatchSink> {
    commands: mpsc::Sender<SessionCommand>,
    task: JoinHandle<SyncEngine<S>>,
}

impl<S> SessionHandle<S>
where
    S: PatchSink + Send + 'static,
{
    pub async fn send(&self, command: SessionCommand) -> Result<(), SessionError> {
        self.commands.send(command).await.map_err(|_| SessionError::Closed)
    }

    pub async fn edit(&self, change: EditorChange) -> Result<(), SessionError> {
        self.send(SessionCommand::Edit(change)).await
    }

    pub async fn external(&self, notification: ExternalNotification) -> Result<(), SessionError> {
        self.send(SessionCommand::External(notification)).await
    }

    /// Flush pending edits, stop the task and hand the engine back
    pub async fn shutdown(self) -> Result<SyncEngine<S>, SessionError> {
        // The task may already be gone; joining reports why
        let _ = self.commands.send(SessionCommand::Shutdown).await;
        Ok(self.task.await?)
    }
}

/// Spawn the engine on the current tokio runtime
pub fn spawn_session<S>(engine: SyncEngine<S>) -> (SessionHandle<S>, UnboundedReceiver<SessionUpdate>)
where
    S: PatchSink + Send + 'static,
{
    let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
    let (updates_tx, updates_rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(run(engine, rx, updates_tx));

    (SessionHandle { commands: tx, task }, updates_rx)
}

async fn run<S: PatchSink>(
    mut engine: SyncEngine<S>,
    mut rx: mpsc::Receiver<SessionCommand>,
    updates: UnboundedSender<SessionUpdate>,
) -> SyncEngine<S> {
    loop {
        let command = match engine.deadline() {
            Some(deadline) => match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(command) => command,
                Err(_) => {
                    engine.poll(Instant::now());
                    continue;
                }
            },
            None => rx.recv().await,
        };

        let Some(command) = command else {
            engine.flush_now();
            break;
        };

        match command {
            SessionCommand::Edit(change) => {
                if let Err(err) = engine.handle_editor_change(change, Instant::now()) {
                    warn!(error = %err, "Edit rejected");
                }
            }
            SessionCommand::External(notification) => {
                let outcome = engine.on_external_patches(notification);
                send_snapshot(&engine, &updates);
                let _ = updates.send(SessionUpdate::Reconciled(outcome));
            }
            SessionCommand::Undo => {
                let step = engine.undo(Instant::now());
                handle_step(&engine, &updates, step);
            }
            SessionCommand::Redo => {
                let step = engine.redo(Instant::now());
                handle_step(&engine, &updates, step);
            }
            SessionCommand::Flush => {
                engine.flush_now();
            }
            SessionCommand::Shutdown => {
                engine.flush_now();
                break;
            }
        }
    }

    debug!("Session stopped");
    engine
}

fn handle_step<S: PatchSink>(
    engine: &SyncEngine<S>,
    updates: &UnboundedSender<SessionUpdate>,
    step: Result<HistoryStep, SyncError>,
) {
    match step {
        Ok(HistoryStep::Applied(_)) => send_snapshot(engine, updates),
        Ok(HistoryStep::EmptyStack) => debug!("Nothing to undo or redo"),
        Err(err) => warn!(error = %err, "Undo/redo failed"),
    }
}

fn send_snapshot<S: PatchSink>(engine: &SyncEngine<S>, updates: &UnboundedSender<SessionUpdate>) {
    // The editor side may have gone away; the engine keeps running until shutdown
    let _ = updates.send(SessionUpdate::Snapshot {
        snapshot: engine.snapshot().clone(),
        selection: engine.selection().cloned(),
    });
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::SyncConfig;
    use blocksync_model::{BlockSchema, Operation, Patch};
    use serde_json::json;

    fn engine(sink: UnboundedSender<Vec<Patch>>) -> SyncEngine<UnboundedSender<Vec<Patch>>> {
        let value = json!([{"_key": "b1", "_type": "block", "style": "normal",
            "children": [{"_key": "s1", "_type": "span", "text": "Hello", "marks": []}]}]);
        SyncEngine::new(value, SyncConfig::default(), BlockSchema::default(), sink)
    }

    fn insert(base: &DocumentSnapshot, offset: usize, text: &str) -> EditorChange {
        EditorChange::from_operations(
            base,
            None,
            vec![Operation::InsertText {
                key: "s1".to_string(),
                offset,
                text: text.to_string(),
            }],
        )
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_flushes_when_idle() {
        let (patch_tx, mut patch_rx) = mpsc::unbounded_channel();
        let engine = engine(patch_tx);
        let base = engine.snapshot().clone();
        let (session, _updates) = spawn_session(engine);

        let first = insert(&base, 5, "!");
        let second = insert(first.snapshot(), 6, "?");
        session.edit(first).await.unwrap();
        session.edit(second).await.unwrap();

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(patch_rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(600)).await;
        let batch = patch_rx.recv().await.unwrap();
        assert_eq!(batch.len(), 1);

        let engine = session.shutdown().await.unwrap();
        assert_eq!(engine.snapshot().span("s1").unwrap().text, "Hello!?");
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_flushes_pending() {
        let (patch_tx, mut patch_rx) = mpsc::unbounded_channel();
        let engine = engine(patch_tx);
        let base = engine.snapshot().clone();
        let (session, _updates) = spawn_session(engine);

        session.edit(insert(&base, 0, "x")).await.unwrap();
        let engine = session.shutdown().await.unwrap();

        assert!(!engine.has_pending());
        assert!(patch_rx.recv().await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_external_notification_reports_outcome() {
        let (patch_tx, _patch_rx) = mpsc::unbounded_channel();
        let (session, mut updates) = spawn_session(engine(patch_tx));

        session
            .external(ExternalNotification {
                patches: vec![],
                should_reset: true,
                snapshot: Some(json!([])),
            })
            .await
            .unwrap();

        match updates.recv().await.unwrap() {
            SessionUpdate::Snapshot { snapshot, .. } => assert!(snapshot.is_empty()),
            other => panic!("Expected snapshot update, got {:?}", other),
        }
        assert!(matches!(updates.recv().await.unwrap(), SessionUpdate::Reconciled(_)));

        session.shutdown().await.unwrap();
    }
}
