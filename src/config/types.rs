//! Config sections and their defaults.

use crate::orchestrate::{RetryPolicy, SchedulerOptions};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry and backoff for the first candidate of every delegated call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts on the first candidate, including the first one.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            factor: default_factor(),
        }
    }
}

impl RetryConfig {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            factor: self.factor,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Items running at once; unset means unbounded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,
    /// Grace period for in-flight calls after cancellation.
    pub cancel_grace_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: None,
            cancel_grace_ms: default_cancel_grace_ms(),
        }
    }
}

impl SchedulerConfig {
    pub fn to_options(&self) -> SchedulerOptions {
        SchedulerOptions {
            max_concurrency: self.max_concurrency,
            cancel_grace: Duration::from_millis(self.cancel_grace_ms),
        }
    }
}

/// Overrides for agent selection; unset values defer to the agent catalog.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_candidates: Option<usize>,
}

pub(crate) fn default_max_attempts() -> u32 {
    2
}

pub(crate) fn default_base_delay_ms() -> u64 {
    2_000
}

pub(crate) fn default_max_delay_ms() -> u64 {
    10_000
}

pub(crate) fn default_factor() -> f64 {
    2.0
}

pub(crate) fn default_cancel_grace_ms() -> u64 {
    2_000
}

pub(crate) fn default_lock_stale_minutes() -> u32 {
    120
}

pub(crate) fn default_specs_dir() -> String {
    "specs".to_string()
}

pub(crate) fn default_agents_file() -> String {
    "agents.yaml".to_string()
}

pub(crate) fn default_agents_dir() -> String {
    "agents".to_string()
}

pub(crate) fn default_true() -> bool {
    true
}
