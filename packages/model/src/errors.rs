//! Error types for the document model

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Node is not a span: {0}")]
    NotASpan(String),

    #[error("Node is not a text block: {0}")]
    NotATextBlock(String),

    #[error("Node is not an object block: {0}")]
    NotAnObjectBlock(String),

    #[error("Offset {offset} out of range for {key} (length {len})")]
    OffsetOutOfRange {
        key: String,
        offset: usize,
        len: usize,
    },

    #[error("Index {index} out of range (length {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Text mismatch at {key}:{offset}: expected {expected:?}, found {found:?}")]
    TextMismatch {
        key: String,
        offset: usize,
        expected: String,
        found: String,
    },

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Reserved field: {0}")]
    ReservedField(String),
}
