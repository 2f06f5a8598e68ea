//! Human-readable progress lines on stderr.

use specrun::events::{EventSink, OrchestrationEvent};

/// Prints batch progress while it runs.
///
/// Registry changes and per-agent success records are left to the event log.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink;

impl EventSink for ConsoleSink {
    fn emit(&self, event: &OrchestrationEvent) {
        if let Some(line) = describe(event) {
            eprintln!("{}", line);
        }
    }
}

pub(crate) fn describe(event: &OrchestrationEvent) -> Option<String> {
    use OrchestrationEvent::*;
    let line = match event {
        ItemStarted { item, command } if item == command.as_str() => format!("[{}] started", item),
        ItemStarted { item, command } => format!("[{}] started ({})", item, command),
        AgentSelected { item, candidates } => {
            format!("[{}] candidates: {}", item, candidates.join(", "))
        }
        AttemptFailed {
            item,
            agent,
            attempt,
            error,
            ..
        } => format!("[{}] {} attempt {} failed: {}", item, agent, attempt, error),
        RetryScheduled {
            item,
            agent,
            delay_ms,
            ..
        } => format!("[{}] retrying {} in {:.1}s", item, agent, *delay_ms as f64 / 1000.0),
        FallbackTriggered { item, from, to } => {
            format!("[{}] falling back from {} to {}", item, from, to)
        }
        ItemCompleted { item, agent } => format!("[{}] done ({})", item, agent),
        ItemSkipped { item, dependency } => {
            format!("[{}] skipped: '{}' did not succeed", item, dependency)
        }
        ItemCancelled { item } => format!("[{}] cancelled", item),
        PhaseAdvanced { from, to, .. } => format!("phase: {} -> {}", from, to),
        PhaseReentered { from, to, .. } => format!("phase: {} -> {} (re-entered)", from, to),
        AgentSucceeded { .. } | AgentsExhausted { .. } | AgentEnabled { .. } | AgentDisabled { .. } => {
            return None;
        }
    };
    Some(line)
}
