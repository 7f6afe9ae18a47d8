//! # Blocksync Model
//!
//! Document model shared by the editor surface and the sync engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ editor surface: Operation → EditorChange    │
//! └─────────────────────────────────────────────┘
//!                     ↓
//! ┌─────────────────────────────────────────────┐
//! │ model: immutable DocumentSnapshot           │
//! │  - key-addressed blocks and spans           │
//! │  - invertible operations                    │
//! │  - patch wire types + text deltas           │
//! │  - external JSON value (de)serialization    │
//! └─────────────────────────────────────────────┘
//!                     ↓
//! ┌─────────────────────────────────────────────┐
//! │ engine: translate, debounce, undo, resync   │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use blocksync_model::{Block, DocumentSnapshot, EditorChange, Operation, Span};
//!
//! let doc = DocumentSnapshot::new(vec![Block::text("b1", vec![Span::new("s1", "Hello")])]).unwrap();
//! let change = EditorChange::from_operations(
//!     &doc,
//!     None,
//!     vec![Operation::InsertText { key: "s1".into(), offset: 5, text: "!".into() }],
//! )
//! .unwrap();
//!
//! assert_eq!(change.snapshot().span("s1").unwrap().text, "Hello!");
//! ```

mod change;
mod document;
mod errors;
mod operations;
mod patch;
mod selection;
mod text_delta;
pub mod value;

pub use change::{is_text_only, ChangeOrigin, EditorChange};
pub use document::{Block, BlockBody, DocumentSnapshot, NodeLocation, Span};
pub use errors::ModelError;
pub use operations::{apply_operation, apply_operations, block_data, invert_operations, Operation};
pub use patch::{display_path, InsertPosition, Locator, Patch, PatchKind, PatchOrigin};
pub use selection::{Point, Selection};
pub use text_delta::{DeltaOp, TextDelta, TextEdit};
pub use value::{classify_value, deserialize, serialize, BlockSchema, SchemaDeprecation, ValueStatus};
