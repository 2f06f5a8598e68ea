//! Durable per-feature workflow state.

use super::{CommandKind, Phase};
use crate::error::{Result, SpecrunError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Version written into every checkpoint.
pub const STATE_SCHEMA_VERSION: u32 = 1;

/// One entry of the append-only completion history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRecord {
    /// The phase this completion is tagged with.
    pub phase: Phase,
    /// `None` for explicit `complete_phase` calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<CommandKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    pub completed_at: DateTime<Utc>,
}

/// A backward move; kept so history is never lost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReentryRecord {
    pub from: Phase,
    pub to: Phase,
    pub at: DateTime<Utc>,
}

/// A phase change produced by a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: Phase,
    pub to: Phase,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub schema_version: u32,
    pub feature_id: String,
    pub current_phase: Phase,
    #[serde(default)]
    completed: Vec<CompletionRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    reentered: Vec<ReentryRecord>,
    /// Free-form data carried between commands.
    #[serde(default)]
    pub context: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checkpoint: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
}

impl WorkflowState {
    pub fn new(feature_id: impl Into<String>) -> Self {
        Self::starting_at(feature_id, Phase::Draft)
    }

    /// A fresh state whose work up to `phase` happened outside the runner.
    pub fn starting_at(feature_id: impl Into<String>, phase: Phase) -> Self {
        Self {
            schema_version: STATE_SCHEMA_VERSION,
            feature_id: feature_id.into(),
            current_phase: phase,
            completed: Vec::new(),
            reentered: Vec::new(),
            context: Map::new(),
            last_checkpoint: None,
            last_updated: Utc::now(),
        }
    }

    /// Completion history, oldest first.
    pub fn completed(&self) -> &[CompletionRecord] {
        &self.completed
    }

    pub fn reentered(&self) -> &[ReentryRecord] {
        &self.reentered
    }

    /// The phase after the current one.
    pub fn suggested_next(&self) -> Option<Phase> {
        self.current_phase.next()
    }

    /// The command that would complete the current phase.
    pub fn suggested_command(&self) -> Option<CommandKind> {
        self.current_phase.completing_command()
    }

    /// Whether `kind` has ever succeeded for this feature.
    pub fn has_completed(&self, kind: CommandKind) -> bool {
        self.completed.iter().any(|r| r.command == Some(kind))
    }

    /// Record a successful command.
    ///
    /// A phase-completing command advances to its phase's successor unless
    /// the workflow is already past it; re-running an earlier command never
    /// moves the phase backwards. Auxiliary commands are tagged with the
    /// current phase and never advance.
    pub fn record_command(&mut self, kind: CommandKind, agent: Option<String>) -> Option<Transition> {
        let now = Utc::now();
        let (tag, target) = match kind.completes() {
            Some(phase) => (phase, phase.next()),
            None => (self.current_phase, None),
        };

        self.completed.push(CompletionRecord {
            phase: tag,
            command: Some(kind),
            agent,
            completed_at: now,
        });
        self.last_updated = now;

        match target {
            Some(to) if to > self.current_phase => {
                let from = self.current_phase;
                self.current_phase = to;
                Some(Transition { from, to })
            }
            _ => None,
        }
    }

    /// Explicitly complete `phase`, which must be the current one.
    pub fn complete_phase(&mut self, phase: Phase) -> Result<Transition> {
        if phase != self.current_phase {
            return Err(SpecrunError::UserError(format!(
                "cannot complete phase '{}': the current phase is '{}'",
                phase, self.current_phase
            )));
        }
        let to = phase.next().ok_or_else(|| {
            SpecrunError::UserError(format!("phase '{}' is terminal", phase))
        })?;

        let now = Utc::now();
        self.completed.push(CompletionRecord {
            phase,
            command: None,
            agent: None,
            completed_at: now,
        });
        self.current_phase = to;
        self.last_updated = now;
        Ok(Transition { from: phase, to })
    }

    /// Move back to an earlier phase. History is kept.
    pub fn reenter(&mut self, phase: Phase) -> Result<Transition> {
        if phase >= self.current_phase {
            return Err(SpecrunError::UserError(format!(
                "cannot re-enter phase '{}': it is not before the current phase '{}'",
                phase, self.current_phase
            )));
        }

        let now = Utc::now();
        let from = self.current_phase;
        self.reentered.push(ReentryRecord {
            from,
            to: phase,
            at: now,
        });
        self.current_phase = phase;
        self.last_updated = now;
        Ok(Transition { from, to: phase })
    }

    pub fn set_context(&mut self, key: impl Into<String>, value: Value) {
        self.context.insert(key.into(), value);
        self.last_updated = Utc::now();
    }

    /// Stamp the state as checkpointed now.
    pub fn mark_checkpoint(&mut self) {
        let now = Utc::now();
        self.last_checkpoint = Some(now);
        self.last_updated = now;
    }

    /// Keep whatever fields of an unreadable or foreign-schema checkpoint
    /// still parse, on top of a fresh state.
    pub(crate) fn salvage(feature_id: &str, raw: &Value) -> Self {
        let mut state = Self::new(feature_id);
        let field = |name: &str| raw.get(name).cloned();

        if let Some(phase) = field("current_phase").and_then(|v| serde_json::from_value(v).ok()) {
            state.current_phase = phase;
        }
        if let Some(Value::Array(records)) = field("completed") {
            state.completed = records
                .into_iter()
                .filter_map(|r| serde_json::from_value(r).ok())
                .collect();
        }
        if let Some(Value::Array(records)) = field("reentered") {
            state.reentered = records
                .into_iter()
                .filter_map(|r| serde_json::from_value(r).ok())
                .collect();
        }
        if let Some(Value::Object(context)) = field("context") {
            state.context = context;
        }
        if let Some(ts) = field("last_checkpoint").and_then(|v| serde_json::from_value(v).ok()) {
            state.last_checkpoint = Some(ts);
        }
        state
    }
}
