//! Scratch storage configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Where per-job input files and output directories live.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ScratchConfig {
    /// Process-wide scratch root. Created at startup if absent.
    #[serde(default = "default_root")]
    #[validate(length(min = 1))]
    pub root: String,
    /// Remove leftovers of a previous (crashed) process when the store opens.
    #[serde(default = "default_purge_on_startup")]
    pub purge_on_startup: bool,
    /// Entries older than this are considered stale by the startup purge.
    #[serde(default = "default_stale_after")]
    #[validate(range(min = 60))]
    pub stale_after_seconds: u64,
}

impl Default for ScratchConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            purge_on_startup: default_purge_on_startup(),
            stale_after_seconds: default_stale_after(),
        }
    }
}

impl ScratchConfig {
    /// Scratch root as a path.
    pub fn root_path(&self) -> PathBuf {
        PathBuf::from(&self.root)
    }
}

fn default_root() -> String {
    "./uploads".to_string()
}

fn default_purge_on_startup() -> bool {
    true
}

fn default_stale_after() -> u64 {
    3600
}
