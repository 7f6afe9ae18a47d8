//! # Blocksync Engine
//!
//! Keeps a block editor's document in sync with a patch-based persistence
//! layer.
//!
//! ## Architecture
//!
//! ```text
//! editor change ──→ PatchDispatcher ──→ ChangeTranslator ──→ PatchSink
//!                   (debounce, merge)   (change → patches)       │
//!                          │                                     ↓
//!                          └──→ UndoRedoManager            persistence
//!                                                                │
//! editor snapshot ←── SyncEngine::on_external_patches ←──────────┘
//!                     (trust or resync, restore selection,
//!                      replay buffered edits)
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use blocksync_engine::{SyncConfig, SyncEngine};
//! use blocksync_model::{BlockSchema, EditorChange, Operation, Patch};
//! use serde_json::json;
//! use tokio::time::Instant;
//!
//! let value = json!([{"_key": "b1", "_type": "block", "style": "normal",
//!     "children": [{"_key": "s1", "_type": "span", "text": "Hello", "marks": []}]}]);
//! let mut engine: SyncEngine<Vec<Vec<Patch>>> =
//!     SyncEngine::new(value, SyncConfig::default(), BlockSchema::default(), Vec::new());
//!
//! let change = EditorChange::from_operations(
//!     engine.snapshot(),
//!     None,
//!     vec![Operation::InsertText { key: "s1".into(), offset: 5, text: " ".into() }],
//! )
//! .unwrap();
//! engine.handle_editor_change(change, Instant::now()).unwrap();
//!
//! // A space is a boundary character, so the patch went out immediately
//! assert_eq!(engine.sink().len(), 1);
//! ```

pub mod config;
pub mod dispatcher;
mod engine;
mod errors;
pub mod history;
mod selection_restore;
pub mod session;
mod sink;
pub mod translator;

pub use config::{ResyncPolicy, SyncConfig, DEFAULT_CONFIG_NAME};
pub use dispatcher::{DebounceState, FlushDecision, FlushReport, PatchDispatcher, PendingChange};
pub use engine::{ExternalNotification, ReconcileDecision, ReconcileOutcome, SyncEngine, SyncState};
pub use errors::{
    ConfigError, InvalidExternalValue, ReplayFailure, SelectionRestoreFailure, SessionError, SyncError,
    TranslationError,
};
pub use history::{HistoryStep, UndoEntry, UndoRedoManager};
pub use selection_restore::restore as restore_selection;
pub use session::{spawn_session, SessionCommand, SessionHandle, SessionUpdate};
pub use sink::PatchSink;
pub use translator::{change_to_patches, operations_to_patches, patches_to_change, replay_operations, ApplyMode};
