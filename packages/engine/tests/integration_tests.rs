//! End-to-end behaviour of the sync engine
//!
//! This tests:
//! - Debounced and boundary-triggered emission
//! - Undo/redo over several edits
//! - Trust vs resync decisions on incoming patches
//! - Selection restore and replay of buffered edits after a resync
//! - Translation round trips

use std::time::Duration;

use blocksync_engine::{
    change_to_patches, patches_to_change, ApplyMode, ExternalNotification, FlushDecision, HistoryStep,
    ReconcileDecision, SyncConfig, SyncEngine,
};
use blocksync_model::{
    serialize, Block, BlockSchema, DeltaOp, DocumentSnapshot, EditorChange, Locator, Operation, Patch, PatchKind,
    PatchOrigin, Selection, Span,
};
use serde_json::{json, Value};
use tokio::time::Instant;

type TestEngine = SyncEngine<Vec<Vec<Patch>>>;

fn hello_value() -> Value {
    json!([{"_key": "b1", "_type": "block", "style": "normal",
        "children": [{"_key": "s1", "_type": "span", "text": "Hello", "marks": []}]}])
}

fn two_block_value() -> Value {
    json!([
        {"_key": "b1", "_type": "block", "style": "normal",
         "children": [{"_key": "s1", "_type": "span", "text": "Hello", "marks": []}]},
        {"_key": "b2", "_type": "block", "style": "normal",
         "children": [{"_key": "s2", "_type": "span", "text": "World", "marks": []}]}
    ])
}

fn engine_with(value: Value, config: SyncConfig) -> TestEngine {
    SyncEngine::new(value, config, BlockSchema::default(), Vec::new())
}

fn change(engine: &TestEngine, operations: Vec<Operation>) -> EditorChange {
    EditorChange::from_operations(engine.snapshot(), engine.selection().cloned(), operations).unwrap()
}

fn insert_text(key: &str, offset: usize, text: &str) -> Operation {
    Operation::InsertText {
        key: key.to_string(),
        offset,
        text: text.to_string(),
    }
}

fn append_block(engine: &TestEngine, key: &str) -> EditorChange {
    let index = engine.snapshot().len();
    change(
        engine,
        vec![Operation::InsertBlock {
            index,
            block: Block::text(key, vec![Span::new(format!("{}-span", key), key)]),
        }],
    )
}

#[test]
fn test_word_is_emitted_once_at_the_space() {
    let mut engine = engine_with(hello_value(), SyncConfig::default());
    let now = Instant::now();

    let first = change(&engine, vec![insert_text("s1", 5, " wor")]);
    assert!(matches!(engine.handle_editor_change(first, now).unwrap(), FlushDecision::Deferred(_)));

    let second = change(&engine, vec![insert_text("s1", 9, "ld")]);
    assert!(matches!(engine.handle_editor_change(second, now).unwrap(), FlushDecision::Deferred(_)));
    assert!(engine.sink().is_empty());

    let space = change(&engine, vec![insert_text("s1", 11, " ")]);
    assert_eq!(engine.handle_editor_change(space, now).unwrap(), FlushDecision::Immediate);

    let batches = engine.sink();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 1);

    let patch = &batches[0][0];
    assert_eq!(patch.top_level_key(), Some("b1"));
    assert_eq!(patch.origin, PatchOrigin::Local);
    match &patch.kind {
        PatchKind::DiffMatchPatch { value } => {
            assert_eq!(value.ops(), &[DeltaOp::Retain(5), DeltaOp::Insert(" world ".to_string())])
        }
        other => panic!("Expected diffMatchPatch, got {:?}", other),
    }
}

#[test]
fn test_keystrokes_wait_for_idle_deadline() {
    let mut engine = engine_with(hello_value(), SyncConfig::default());
    let start = Instant::now();

    let c1 = change(&engine, vec![insert_text("s1", 5, "a")]);
    engine.handle_editor_change(c1, start).unwrap();

    // A second keystroke restarts the deadline
    let later = start + Duration::from_millis(600);
    let c2 = change(&engine, vec![insert_text("s1", 6, "b")]);
    engine.handle_editor_change(c2, later).unwrap();

    assert!(!engine.poll(start + Duration::from_millis(1000)));
    assert!(engine.sink().is_empty());

    assert!(engine.poll(later + Duration::from_millis(1000)));
    assert_eq!(engine.sink().len(), 1);
    assert!(!engine.has_pending());
}

#[test]
fn test_empty_flush_is_idempotent() {
    let mut engine = engine_with(hello_value(), SyncConfig::default());
    assert!(!engine.flush_now());
    assert!(!engine.flush_now());
    assert!(!engine.poll(Instant::now() + Duration::from_secs(60)));
    assert!(engine.sink().is_empty());
}

#[test]
fn test_undo_redo_block_edits() {
    let mut engine = engine_with(two_block_value(), SyncConfig::default());
    let now = Instant::now();
    let initial = engine.snapshot().clone();

    for key in ["b3", "b4", "b5"] {
        let edit = append_block(&engine, key);
        engine.handle_editor_change(edit, now).unwrap();
    }
    let edited = engine.snapshot().clone();
    assert_eq!(engine.undo_levels(), 3);

    for _ in 0..3 {
        assert!(matches!(engine.undo(now).unwrap(), HistoryStep::Applied(_)));
    }
    assert_eq!(engine.snapshot(), &initial);
    assert!(matches!(engine.undo(now).unwrap(), HistoryStep::EmptyStack));

    for _ in 0..3 {
        assert!(matches!(engine.redo(now).unwrap(), HistoryStep::Applied(_)));
    }
    assert_eq!(engine.snapshot(), &edited);
    assert_eq!(engine.redo_levels(), 0);

    // 3 edits, 3 undos, 3 redos all went out as patches
    assert_eq!(engine.sink().len(), 9);
}

#[test]
fn test_undo_text_edits_when_nested_paths_are_recorded() {
    let config = SyncConfig {
        undo_max_path_len: 4,
        ..SyncConfig::default()
    };
    let mut engine = engine_with(hello_value(), config);
    let now = Instant::now();
    let initial = engine.snapshot().clone();

    let c1 = change(&engine, vec![insert_text("s1", 5, " ")]);
    engine.handle_editor_change(c1, now).unwrap();
    let c2 = change(&engine, vec![insert_text("s1", 6, "\n")]);
    engine.handle_editor_change(c2, now).unwrap();
    assert_eq!(engine.undo_levels(), 2);

    engine.undo(now).unwrap();
    assert_eq!(engine.snapshot().span("s1").unwrap().text, "Hello ");
    engine.undo(now).unwrap();
    assert_eq!(engine.snapshot(), &initial);
}

#[test]
fn test_undo_restores_selection() {
    let mut engine = engine_with(two_block_value(), SyncConfig::default());
    let now = Instant::now();
    engine.set_selection(Some(Selection::caret("s2", 5)));

    let mut edit_ops = vec![Operation::InsertBlock {
        index: 2,
        block: Block::text("b3", vec![Span::new("s3", "")]),
    }];
    edit_ops.push(Operation::SetSelection {
        selection: Some(Selection::caret("s3", 0)),
        previous: Some(Selection::caret("s2", 5)),
    });
    let edit = change(&engine, edit_ops);
    engine.handle_editor_change(edit, now).unwrap();
    assert_eq!(engine.selection(), Some(&Selection::caret("s3", 0)));

    engine.undo(now).unwrap();
    assert_eq!(engine.selection(), Some(&Selection::caret("s2", 5)));

    engine.redo(now).unwrap();
    assert_eq!(engine.selection(), Some(&Selection::caret("s3", 0)));
}

#[test]
fn test_single_local_set_is_trusted() {
    let mut engine = engine_with(two_block_value(), SyncConfig::default());

    let outcome = engine.on_external_patches(ExternalNotification {
        patches: vec![Patch::set(vec![Locator::key("b1"), Locator::field("style")], json!("h1"))],
        should_reset: false,
        snapshot: Some(two_block_value()),
    });

    assert_eq!(outcome.decision, ReconcileDecision::TrustedNoResync);
}

#[test]
fn test_single_remote_patch_resyncs() {
    let mut engine = engine_with(two_block_value(), SyncConfig::default());

    let outcome = engine.on_external_patches(ExternalNotification {
        patches: vec![Patch::set(vec![Locator::key("b1"), Locator::field("style")], json!("h1"))
            .with_origin(PatchOrigin::Remote)],
        should_reset: false,
        snapshot: Some(two_block_value()),
    });

    assert_eq!(outcome.decision, ReconcileDecision::Resynced);
}

#[test]
fn test_trust_thresholds() {
    let mut engine = engine_with(two_block_value(), SyncConfig::default());

    let two_blocks = engine.on_external_patches(ExternalNotification {
        patches: vec![
            Patch::set(vec![Locator::key("b1"), Locator::field("style")], json!("h1")),
            Patch::set(vec![Locator::key("b2"), Locator::field("style")], json!("h2")),
        ],
        should_reset: false,
        snapshot: Some(two_block_value()),
    });
    assert_eq!(two_blocks.decision, ReconcileDecision::Resynced);

    let many = engine.on_external_patches(ExternalNotification {
        patches: vec![Patch::set(vec![Locator::key("b1"), Locator::field("style")], json!("h1")); 4],
        should_reset: false,
        snapshot: Some(two_block_value()),
    });
    assert_eq!(many.decision, ReconcileDecision::Resynced);

    let structural = engine.on_external_patches(ExternalNotification {
        patches: vec![Patch::unset(vec![Locator::key("b2")])],
        should_reset: false,
        snapshot: Some(hello_value()),
    });
    assert_eq!(structural.decision, ReconcileDecision::Resynced);
}

#[test]
fn test_remote_unset_loses_selection() {
    let mut engine = engine_with(two_block_value(), SyncConfig::default());
    engine.set_selection(Some(Selection::caret("s2", 2)));

    let outcome = engine.on_external_patches(ExternalNotification {
        patches: vec![Patch::unset(vec![Locator::key("b2")]).with_origin(PatchOrigin::Remote)],
        should_reset: false,
        snapshot: Some(hello_value()),
    });

    assert_eq!(outcome.decision, ReconcileDecision::Resynced);
    assert_eq!(outcome.selection_error.map(|e| e.key), Some("s2".to_string()));
    assert_eq!(outcome.selection, None);
    assert_eq!(engine.selection(), None);
    assert!(!outcome.focus);

    let keys: Vec<&str> = engine.snapshot().block_keys().collect();
    assert_eq!(keys, vec!["b1"]);
}

#[test]
fn test_buffered_edits_replayed_over_remote_change() {
    let mut engine = engine_with(two_block_value(), SyncConfig::default());
    let now = Instant::now();

    let typing = change(&engine, vec![insert_text("s1", 5, "!")]);
    engine.handle_editor_change(typing, now).unwrap();
    assert!(engine.has_pending());

    let mut remote = two_block_value();
    remote[1]["children"][0]["text"] = json!("Earth");
    let outcome = engine.on_external_patches(ExternalNotification {
        patches: vec![Patch::set(
            vec![Locator::key("b2"), Locator::field("children"), Locator::key("s2"), Locator::field("text")],
            json!("Earth"),
        )
        .with_origin(PatchOrigin::Remote)],
        should_reset: false,
        snapshot: Some(remote),
    });

    assert!(outcome.replay_error.is_none());
    assert_eq!(engine.snapshot().span("s1").unwrap().text, "Hello!");
    assert_eq!(engine.snapshot().span("s2").unwrap().text, "Earth");

    // The buffered keystroke still goes out, without touching b2
    assert!(engine.flush_now());
    let batch = &engine.sink()[0];
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].top_level_key(), Some("b1"));
    assert_eq!(engine.external_value()[1]["children"][0]["text"], "Earth");
}

#[test]
fn test_typing_around_remote_edit_in_same_span() {
    let mut engine = engine_with(hello_value(), SyncConfig::default());
    let now = Instant::now();

    let typing = change(&engine, vec![insert_text("s1", 5, "!")]);
    engine.handle_editor_change(typing, now).unwrap();

    let mut remote = hello_value();
    remote[0]["children"][0]["text"] = json!("Howdy");
    let outcome = engine.on_external_patches(ExternalNotification {
        patches: vec![Patch::set(
            vec![Locator::key("b1"), Locator::field("children"), Locator::key("s1"), Locator::field("text")],
            json!("Howdy"),
        )
        .with_origin(PatchOrigin::Remote)],
        should_reset: false,
        snapshot: Some(remote),
    });
    assert!(outcome.replay_error.is_none());
    assert_eq!(engine.snapshot().span("s1").unwrap().text, "Howdy!");

    let more = change(&engine, vec![insert_text("s1", 6, "?")]);
    engine.handle_editor_change(more, now).unwrap();
    assert!(engine.flush_now());

    // Only the local keystrokes go out, addressed to the text the store holds
    let batches = engine.sink();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 1);
    let patch = &batches[0][0];
    assert_eq!(patch.origin, PatchOrigin::Local);
    match &patch.kind {
        PatchKind::DiffMatchPatch { value } => {
            assert_eq!(value.ops(), &[DeltaOp::Retain(5), DeltaOp::Insert("!?".to_string())]);
            assert_eq!(value.apply("s1", "Howdy").unwrap(), "Howdy!?");
        }
        other => panic!("Expected diffMatchPatch, got {:?}", other),
    }
}

#[test]
fn test_failed_replay_drops_buffered_edits() {
    let mut engine = engine_with(two_block_value(), SyncConfig::default());
    let now = Instant::now();

    let typing = change(&engine, vec![insert_text("s2", 5, "!")]);
    engine.handle_editor_change(typing, now).unwrap();

    let outcome = engine.on_external_patches(ExternalNotification {
        patches: vec![Patch::unset(vec![Locator::key("b2")]).with_origin(PatchOrigin::Remote)],
        should_reset: false,
        snapshot: Some(hello_value()),
    });

    let failure = outcome.replay_error.expect("replay should fail");
    assert_eq!(failure.dropped, 1);
    assert!(!engine.has_pending());
    assert_eq!(engine.snapshot().len(), 1);
    assert!(!engine.flush_now());
}

#[test]
fn test_local_patches_do_not_replay_buffer() {
    let mut engine = engine_with(two_block_value(), SyncConfig::default());
    let now = Instant::now();

    let typing = change(&engine, vec![insert_text("s1", 5, "!")]);
    engine.handle_editor_change(typing, now).unwrap();

    // A local patch in the batch means the buffer is not replayed
    let outcome = engine.on_external_patches(ExternalNotification {
        patches: vec![Patch::set(vec![Locator::key("b2"), Locator::field("style")], json!("normal"))],
        should_reset: true,
        snapshot: Some(two_block_value()),
    });

    assert_eq!(outcome.decision, ReconcileDecision::Resynced);
    assert_eq!(engine.snapshot().span("s1").unwrap().text, "Hello");
    assert!(engine.has_pending());
}

#[test]
fn test_translation_round_trips() {
    let schema = BlockSchema::default();
    let pre = DocumentSnapshot::new(vec![
        Block::text("b1", vec![Span::new("s1", "Hello"), Span::new("s2", " there").with_marks(["em"])]),
        Block::text("b2", vec![Span::new("s3", "World")]),
    ])
    .unwrap();
    let external = serialize(&pre, &schema);

    let cases: Vec<Vec<Operation>> = vec![
        vec![insert_text("s1", 0, ">> ")],
        vec![Operation::RemoveText {
            key: "s2".to_string(),
            offset: 1,
            text: "the".to_string(),
        }],
        vec![insert_text("s1", 5, ","), insert_text("s3", 5, "!")],
        vec![Operation::InsertBlock {
            index: 0,
            block: Block::text("b0", vec![Span::new("s0", "Title")]).with_style("h1"),
        }],
        vec![Operation::RemoveBlock {
            index: 1,
            block: pre.block("b2").unwrap().clone(),
        }],
        vec![Operation::InsertSpan {
            block_key: "b2".to_string(),
            index: 1,
            span: Span::new("s4", "!").with_marks(["strong"]),
        }],
        vec![Operation::SetMarks {
            key: "s1".to_string(),
            marks: ["strong".to_string()].into_iter().collect(),
            previous: Default::default(),
        }],
        vec![Operation::SetBlockData {
            key: "b2".to_string(),
            field: "style".to_string(),
            value: Some(json!("blockquote")),
            previous: Some(json!("normal")),
        }],
        vec![
            Operation::RemoveBlock {
                index: 0,
                block: pre.block("b1").unwrap().clone(),
            },
            Operation::InsertBlock {
                index: 1,
                block: pre.block("b1").unwrap().clone(),
            },
        ],
    ];

    for operations in cases {
        let change = EditorChange::from_operations(&pre, None, operations.clone()).unwrap();
        let patches = change_to_patches(&pre, &change, &external, &schema);
        assert!(!patches.is_empty(), "No patches for {:?}", operations);

        let back = patches_to_change(&patches, &pre, None, &schema, ApplyMode::Strict).unwrap();
        assert_eq!(back.snapshot(), change.snapshot(), "Round trip failed for {:?}", operations);
    }
}
