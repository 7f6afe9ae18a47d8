//! Operation sequences applied through the model
//!
//! This tests:
//! - Mixed structural and text edits
//! - Inverting a whole operation log
//! - Round trips through the external value

use blocksync_model::{
    apply_operations, deserialize, invert_operations, serialize, Block, BlockSchema, DocumentSnapshot,
    EditorChange, Operation, Selection, Span,
};
use serde_json::json;

fn paragraph_doc() -> DocumentSnapshot {
    DocumentSnapshot::new(vec![
        Block::text("b1", vec![Span::new("s1", "First paragraph")]),
        Block::text("b2", vec![Span::new("s2", "Second"), Span::new("s3", " paragraph").with_marks(["em"])]),
    ])
    .unwrap()
}

#[test]
fn test_split_like_sequence_then_invert() {
    let doc = paragraph_doc();

    // Cut " paragraph" off b1 and move it into a new block
    let ops = vec![
        Operation::RemoveText {
            key: "s1".to_string(),
            offset: 5,
            text: " paragraph".to_string(),
        },
        Operation::InsertBlock {
            index: 1,
            block: Block::text("b3", vec![Span::new("s4", "paragraph")]),
        },
        Operation::SetSelection {
            selection: Some(Selection::caret("s4", 0)),
            previous: Some(Selection::caret("s1", 5)),
        },
    ];

    let change = EditorChange::from_operations(&doc, Some(Selection::caret("s1", 5)), ops.clone()).unwrap();
    let after = change.snapshot();

    let keys: Vec<&str> = after.block_keys().collect();
    assert_eq!(keys, vec!["b1", "b3", "b2"]);
    assert_eq!(after.span("s1").unwrap().text, "First");
    assert_eq!(change.selection(), Some(&Selection::caret("s4", 0)));

    let restored = apply_operations(after, &invert_operations(&ops)).unwrap();
    assert_eq!(restored, doc);
}

#[test]
fn test_removed_block_keys_are_released() {
    let doc = paragraph_doc();
    let removed = doc.block("b2").unwrap().clone();

    let after = apply_operations(
        &doc,
        &[Operation::RemoveBlock {
            index: 1,
            block: removed,
        }],
    )
    .unwrap();

    assert!(!after.contains_key("b2"));
    assert!(!after.contains_key("s3"));

    // A key that was removed can be reused
    let reinserted = apply_operations(
        &after,
        &[Operation::InsertBlock {
            index: 1,
            block: Block::text("b2", vec![Span::new("s2", "again")]),
        }],
    )
    .unwrap();
    assert_eq!(reinserted.block("b2").unwrap().plain_text(), "again");
}

#[test]
fn test_duplicate_key_insert_fails() {
    let doc = paragraph_doc();
    let result = apply_operations(
        &doc,
        &[Operation::InsertSpan {
            block_key: "b1".to_string(),
            index: 0,
            span: Span::new("s2", "dup"),
        }],
    );
    assert!(result.is_err());
}

#[test]
fn test_external_value_round_trip() {
    let schema = BlockSchema::default();
    let doc = paragraph_doc();

    let value = serialize(&doc, &schema);
    assert_eq!(value[1]["children"][1], json!({"_key": "s3", "_type": "span", "text": " paragraph", "marks": ["em"]}));

    assert_eq!(deserialize(&value, &schema).unwrap(), doc);
}
