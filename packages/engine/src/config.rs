//! Engine configuration
//!
//! Loaded from a JSON file; every field has a default so a partial (or
//! missing) file is fine.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

pub const DEFAULT_CONFIG_NAME: &str = "blocksync.config.json";

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    /// Idle delay before plain keystrokes are flushed
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Characters whose insertion or removal flushes immediately
    #[serde(default = "default_boundary_chars")]
    pub boundary_chars: Vec<char>,

    /// Maximum entries kept on each of the undo and redo stacks.
    /// The oldest entry is dropped when the bound is exceeded.
    #[serde(default = "default_undo_limit")]
    pub undo_limit: usize,

    /// Longest patch path recorded for undo. Emissions containing any
    /// patch with a longer path are not recorded.
    #[serde(default = "default_undo_max_path_len")]
    pub undo_max_path_len: usize,

    #[serde(default)]
    pub resync: ResyncPolicy,
}

/// When incoming patches force a full rebuild of the editor snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResyncPolicy {
    /// Patch batches larger than this are never trusted
    #[serde(default = "default_max_trusted_patches")]
    pub max_trusted_patches: usize,

    /// Batches touching more distinct top-level blocks are never trusted
    #[serde(default = "default_max_trusted_blocks")]
    pub max_trusted_blocks: usize,
}

fn default_debounce_ms() -> u64 {
    1000
}

fn default_boundary_chars() -> Vec<char> {
    vec![' ', '\n']
}

fn default_undo_limit() -> usize {
    100
}

fn default_undo_max_path_len() -> usize {
    1
}

fn default_max_trusted_patches() -> usize {
    3
}

fn default_max_trusted_blocks() -> usize {
    1
}

impl Default for ResyncPolicy {
    fn default() -> Self {
        Self {
            max_trusted_patches: default_max_trusted_patches(),
            max_trusted_blocks: default_max_trusted_blocks(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            boundary_chars: default_boundary_chars(),
            undo_limit: default_undo_limit(),
            undo_max_path_len: default_undo_max_path_len(),
            resync: ResyncPolicy::default(),
        }
    }
}

impl SyncConfig {
    /// Load config from a file, falling back to defaults when it does not exist
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Load `blocksync.config.json` from a directory
    pub fn load_from_dir(dir: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::load(dir.as_ref().join(DEFAULT_CONFIG_NAME))
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn is_boundary_text(&self, text: &str) -> bool {
        let mut chars = text.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => self.boundary_chars.contains(&c),
            _ => false,
        }
    }
}
