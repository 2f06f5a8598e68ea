//! Config struct definition and default implementation.

use super::types::*;
use serde::{Deserialize, Serialize};

/// Contents of `.specrun/config.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub retry: RetryConfig,

    pub scheduler: SchedulerConfig,

    pub selection: SelectionConfig,

    /// Minutes after which a lock is reported as stale.
    #[serde(default = "default_lock_stale_minutes")]
    pub lock_stale_minutes: u32,

    /// Where feature artifacts are written, relative to the workspace root.
    #[serde(default = "default_specs_dir")]
    pub specs_dir: String,

    /// Agent catalog file, relative to the state directory.
    #[serde(default = "default_agents_file")]
    pub agents_file: String,

    /// Directory of `*.md` agent definitions, relative to the state directory.
    /// Used when `agents_file` does not exist.
    #[serde(default = "default_agents_dir")]
    pub agents_dir: String,

    /// Append orchestration events to `events.ndjson`.
    #[serde(default = "default_true")]
    pub event_log: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            scheduler: SchedulerConfig::default(),
            selection: SelectionConfig::default(),
            lock_stale_minutes: default_lock_stale_minutes(),
            specs_dir: default_specs_dir(),
            agents_file: default_agents_file(),
            agents_dir: default_agents_dir(),
            event_log: default_true(),
        }
    }
}
