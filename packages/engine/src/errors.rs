//! Error types for the sync engine

use blocksync_model::{ModelError, SchemaDeprecation, ValueStatus};
use thiserror::Error;

/// A patch could not be resolved against the snapshot it was applied to
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TranslationError {
    #[error("Path {path} does not resolve: {reason}")]
    UnresolvedPath { path: String, reason: String },

    #[error("Unsupported {patch_type} patch at {path}")]
    Unsupported { patch_type: String, path: String },

    #[error("Model error: {0}")]
    Model(#[from] ModelError),
}

/// The prior selection could not be located in the new snapshot
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Could not find a descendant with key {key}")]
pub struct SelectionRestoreFailure {
    pub key: String,
}

/// Buffered local operations could not be re-applied after a resync
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Could not apply pending local operations ({dropped} dropped): {source}")]
pub struct ReplayFailure {
    pub dropped: usize,
    #[source]
    pub source: ModelError,
}

/// The external value does not have the expected document shape
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InvalidExternalValue {
    #[error("Expected an array of blocks, got {actual_type}")]
    NotAnArray { actual_type: String },

    #[error("Document uses the deprecated block format")]
    Deprecated,

    #[error("Block schema uses a deprecated {0:?} definition")]
    DeprecatedSchema(SchemaDeprecation),

    #[error("Malformed document: {0}")]
    Malformed(#[from] ModelError),
}

impl InvalidExternalValue {
    /// Map a non-valid classification to an error
    pub fn from_status(status: ValueStatus) -> Option<Self> {
        match status {
            ValueStatus::Valid => None,
            ValueStatus::Invalid { actual_type } => Some(Self::NotAnArray { actual_type }),
            ValueStatus::Deprecated => Some(Self::Deprecated),
        }
    }
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Translation error: {0}")]
    Translation(#[from] TranslationError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Invalid external value: {0}")]
    InvalidValue(#[from] InvalidExternalValue),

    #[error("Editor is disabled: {0}")]
    Disabled(InvalidExternalValue),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session has shut down")]
    Closed,

    #[error("Session task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
