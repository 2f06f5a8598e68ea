//! The workflow state machine: the only writer of a feature's checkpoint.
//!
//! Every mutation runs under the feature lock, re-reads the checkpoint from
//! storage first (another process may have advanced it), applies the change
//! to a copy, writes the copy, and only then adopts it.

use super::state::{Transition, WorkflowState};
use super::store::{LoadWarning, StateStore};
use super::{CommandKind, Phase};
use crate::context::WorkspaceContext;
use crate::error::Result;
use crate::events::{EventSink, OrchestrationEvent};
use crate::locks::{LockGuard, acquire_feature_lock};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Context key mapping each command to the agent that last produced it.
pub const AGENTS_CONTEXT_KEY: &str = "agents";

pub struct WorkflowMachine {
    ctx: WorkspaceContext,
    feature: String,
    store: Arc<dyn StateStore>,
    sink: Arc<dyn EventSink>,
    state: WorkflowState,
    initial_phase: Phase,
    warnings: Vec<LoadWarning>,
}

impl WorkflowMachine {
    /// Load `feature`'s checkpoint, or start a fresh state at `initial_phase`.
    pub fn open(
        ctx: &WorkspaceContext,
        feature: &str,
        store: Arc<dyn StateStore>,
        sink: Arc<dyn EventSink>,
        initial_phase: Phase,
    ) -> Result<Self> {
        let (state, warnings) = match store.load(feature)? {
            Some(loaded) => (loaded.state, loaded.warnings),
            None => {
                tracing::debug!(feature, phase = %initial_phase, "no checkpoint, starting fresh");
                (WorkflowState::starting_at(feature, initial_phase), Vec::new())
            }
        };

        Ok(Self {
            ctx: ctx.clone(),
            feature: feature.to_string(),
            store,
            sink,
            state,
            initial_phase,
            warnings,
        })
    }

    pub fn feature(&self) -> &str {
        &self.feature
    }

    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    /// Recoverable problems found when the checkpoint was last read.
    pub fn warnings(&self) -> &[LoadWarning] {
        &self.warnings
    }

    /// Acquire the feature lock.
    pub fn lock(&self, action: &str) -> Result<LockGuard> {
        acquire_feature_lock(&self.ctx, &self.feature, action)
    }

    /// Re-read the checkpoint; keeps the in-memory state if none exists.
    pub fn reload(&mut self) -> Result<()> {
        if let Some(loaded) = self.store.load(&self.feature)? {
            self.state = loaded.state;
            self.warnings = loaded.warnings;
        }
        Ok(())
    }

    /// Apply `f` while the caller holds the feature lock.
    ///
    /// Nothing is written when `f` fails.
    pub fn mutate_locked<R>(
        &mut self,
        guard: &LockGuard,
        f: impl FnOnce(&mut WorkflowState) -> Result<R>,
    ) -> Result<R> {
        debug_assert_eq!(guard.path(), self.ctx.feature_lock_path(&self.feature));
        self.reload()?;

        let mut next = self.state.clone();
        let out = f(&mut next)?;
        next.mark_checkpoint();
        self.store.save(&self.feature, &next)?;
        self.state = next;
        Ok(out)
    }

    /// Acquire the lock, apply `f`, release.
    pub fn mutate<R>(
        &mut self,
        action: &str,
        f: impl FnOnce(&mut WorkflowState) -> Result<R>,
    ) -> Result<R> {
        let guard = self.lock(action)?;
        self.mutate_locked(&guard, f)
    }

    /// Record the successful commands of one batch, in order.
    ///
    /// The agent that produced each command's artifact is kept in the
    /// context under [`AGENTS_CONTEXT_KEY`], latest run winning.
    pub fn record_batch(
        &mut self,
        guard: &LockGuard,
        completions: &[(CommandKind, String)],
    ) -> Result<Vec<Transition>> {
        let advanced = self.mutate_locked(guard, |state| {
            if !completions.is_empty() {
                let mut agents = match state.context.get(AGENTS_CONTEXT_KEY) {
                    Some(Value::Object(agents)) => agents.clone(),
                    _ => Map::new(),
                };
                for (kind, agent) in completions {
                    agents.insert(kind.as_str().to_string(), Value::String(agent.clone()));
                }
                state.set_context(AGENTS_CONTEXT_KEY, Value::Object(agents));
            }
            Ok(completions
                .iter()
                .filter_map(|(kind, agent)| {
                    state
                        .record_command(*kind, Some(agent.clone()))
                        .map(|t| (*kind, t))
                })
                .collect::<Vec<_>>())
        })?;

        for (kind, t) in &advanced {
            self.emit_advanced(*t, Some(*kind));
        }
        Ok(advanced.into_iter().map(|(_, t)| t).collect())
    }

    pub fn complete_phase(&mut self, phase: Phase) -> Result<Transition> {
        let t = self.mutate("state complete", |state| state.complete_phase(phase))?;
        self.emit_advanced(t, None);
        Ok(t)
    }

    pub fn reenter(&mut self, phase: Phase) -> Result<Transition> {
        let t = self.mutate("state reenter", |state| state.reenter(phase))?;
        tracing::info!(feature = %self.feature, from = %t.from, to = %t.to, "phase re-entered");
        self.sink.emit(&OrchestrationEvent::PhaseReentered {
            feature: self.feature.clone(),
            from: t.from,
            to: t.to,
        });
        Ok(t)
    }

    /// Phase a fresh state would start in.
    pub fn initial_phase(&self) -> Phase {
        self.initial_phase
    }

    fn emit_advanced(&self, t: Transition, command: Option<CommandKind>) {
        tracing::info!(feature = %self.feature, from = %t.from, to = %t.to, "phase advanced");
        self.sink.emit(&OrchestrationEvent::PhaseAdvanced {
            feature: self.feature.clone(),
            from: t.from,
            to: t.to,
            command,
        });
    }
}
