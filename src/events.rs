//! Orchestration events.
//!
//! Every decision the user might want to see (which agent was picked, why a
//! retry or fallback happened, which items were skipped, phase movements) is
//! emitted as an [`OrchestrationEvent`] to an [`EventSink`].
//!
//! The durable sink is an append-only NDJSON log at
//! `.specrun/features/<feature>/events.ndjson`, one [`EventRecord`] per line:
//!
//! ```text
//! {"ts":"2026-01-05T10:00:00Z","actor":"dev@host","event":"fallback_triggered","item":"plan","from":"archie","to":"generic"}
//! ```

use crate::error::{Result, SpecrunError};
use crate::locks::owner_string;
use crate::workflow::{CommandKind, Phase};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Something that happened while orchestrating work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OrchestrationEvent {
    AgentSelected {
        item: String,
        candidates: Vec<String>,
    },
    AttemptFailed {
        item: String,
        agent: String,
        attempt: u32,
        transient: bool,
        error: String,
    },
    RetryScheduled {
        item: String,
        agent: String,
        /// The attempt about to be made.
        attempt: u32,
        delay_ms: u64,
    },
    FallbackTriggered {
        item: String,
        from: String,
        to: String,
    },
    AgentSucceeded {
        item: String,
        agent: String,
        attempts: u32,
        fallback_used: bool,
    },
    AgentsExhausted {
        item: String,
        agents: Vec<String>,
    },
    ItemStarted {
        item: String,
        command: CommandKind,
    },
    ItemCompleted {
        item: String,
        agent: String,
    },
    ItemSkipped {
        item: String,
        dependency: String,
    },
    ItemCancelled {
        item: String,
    },
    PhaseAdvanced {
        feature: String,
        from: Phase,
        to: Phase,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        command: Option<CommandKind>,
    },
    PhaseReentered {
        feature: String,
        from: Phase,
        to: Phase,
    },
    AgentEnabled {
        agent: String,
    },
    AgentDisabled {
        agent: String,
    },
}

impl OrchestrationEvent {
    /// The snake_case event name.
    pub fn name(&self) -> &'static str {
        match self {
            OrchestrationEvent::AgentSelected { .. } => "agent_selected",
            OrchestrationEvent::AttemptFailed { .. } => "attempt_failed",
            OrchestrationEvent::RetryScheduled { .. } => "retry_scheduled",
            OrchestrationEvent::FallbackTriggered { .. } => "fallback_triggered",
            OrchestrationEvent::AgentSucceeded { .. } => "agent_succeeded",
            OrchestrationEvent::AgentsExhausted { .. } => "agents_exhausted",
            OrchestrationEvent::ItemStarted { .. } => "item_started",
            OrchestrationEvent::ItemCompleted { .. } => "item_completed",
            OrchestrationEvent::ItemSkipped { .. } => "item_skipped",
            OrchestrationEvent::ItemCancelled { .. } => "item_cancelled",
            OrchestrationEvent::PhaseAdvanced { .. } => "phase_advanced",
            OrchestrationEvent::PhaseReentered { .. } => "phase_reentered",
            OrchestrationEvent::AgentEnabled { .. } => "agent_enabled",
            OrchestrationEvent::AgentDisabled { .. } => "agent_disabled",
        }
    }
}

/// One line of the NDJSON log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub ts: DateTime<Utc>,
    /// `user@host` of the emitting process.
    pub actor: String,
    #[serde(flatten)]
    pub event: OrchestrationEvent,
}

impl EventRecord {
    pub fn new(event: OrchestrationEvent) -> Self {
        Self {
            ts: Utc::now(),
            actor: owner_string(),
            event,
        }
    }

    pub fn to_ndjson_line(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| SpecrunError::StateError(format!("failed to serialize event: {}", e)))
    }
}

/// Receives orchestration events.
///
/// Emitting never fails the caller; sinks log their own I/O problems.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &OrchestrationEvent);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &OrchestrationEvent) {}
}

/// Append-only NDJSON event log.
#[derive(Debug)]
pub struct NdjsonEventLog {
    path: PathBuf,
    /// Serializes appends from concurrent items.
    write_lock: Mutex<()>,
}

impl NdjsonEventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record as a single line.
    pub fn append(&self, record: &EventRecord) -> Result<()> {
        let line = record.to_ndjson_line()?;
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());

        if let Some(parent) = self.path.parent()
            && !parent.exists()
        {
            fs::create_dir_all(parent).map_err(|e| {
                SpecrunError::StateError(format!(
                    "failed to create events directory '{}': {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| {
                SpecrunError::StateError(format!(
                    "failed to open event log '{}': {}",
                    self.path.display(),
                    e
                ))
            })?;

        writeln!(file, "{}", line).map_err(|e| {
            SpecrunError::StateError(format!(
                "failed to append to event log '{}': {}",
                self.path.display(),
                e
            ))
        })
    }
}

impl EventSink for NdjsonEventLog {
    fn emit(&self, event: &OrchestrationEvent) {
        if let Err(e) = self.append(&EventRecord::new(event.clone())) {
            tracing::warn!("dropping {} event: {}", event.name(), e);
        }
    }
}

/// Read every record of an NDJSON event log. A missing file is an empty log.
pub fn read_events(path: &Path) -> Result<Vec<EventRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = fs::read_to_string(path).map_err(|e| {
        SpecrunError::StateError(format!(
            "failed to read event log '{}': {}",
            path.display(),
            e
        ))
    })?;

    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .enumerate()
        .map(|(idx, line)| {
            serde_json::from_str(line).map_err(|e| {
                SpecrunError::StateError(format!(
                    "event log '{}' line {}: {}",
                    path.display(),
                    idx + 1,
                    e
                ))
            })
        })
        .collect()
}

/// Collects events in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<OrchestrationEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything emitted so far.
    pub fn events(&self) -> Vec<OrchestrationEvent> {
        self.events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: &OrchestrationEvent) {
        self.events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(event.clone());
    }
}

/// Forwards events to a tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<OrchestrationEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OrchestrationEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: &OrchestrationEvent) {
        // A dropped receiver just means nobody is listening any more.
        let _ = self.tx.send(event.clone());
    }
}

/// Emits to several sinks in order.
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: &OrchestrationEvent) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }
}
