//! The delegated-call primitive.
//!
//! A call hands one agent an immutable [`Payload`] and gets back text or a
//! [`CallError`]. Transient failures (timeouts, rate limits) may be retried by
//! the coordinator; permanent ones never are.
//!
//! [`CommandAgentCall`] is the shipped implementation: it runs the agent's
//! command template as a subprocess.

mod executor;

pub use executor::CommandAgentCall;

use crate::agent::AgentProfile;
use crate::workflow::CommandKind;
use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

/// Output of an already-finished prerequisite item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upstream {
    pub item: String,
    pub agent: String,
    pub output: String,
}

/// Everything a delegated call receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    /// Work item id, used for log locations and events.
    pub item: String,
    pub kind: CommandKind,
    pub prompt: String,
    /// Outputs of the item's dependencies, in dependency order.
    pub upstream: Vec<Upstream>,
}

impl Payload {
    pub fn new(item: impl Into<String>, kind: CommandKind, prompt: impl Into<String>) -> Self {
        Self {
            item: item.into(),
            kind,
            prompt: prompt.into(),
            upstream: Vec::new(),
        }
    }

    /// The prompt with upstream outputs appended as sections.
    pub fn render(&self) -> String {
        if self.upstream.is_empty() {
            return self.prompt.clone();
        }
        let mut out = self.prompt.trim_end().to_string();
        for up in &self.upstream {
            out.push_str(&format!(
                "\n\n## Output of {} (by {})\n\n{}",
                up.item,
                up.agent,
                up.output.trim()
            ));
        }
        out.push('\n');
        out
    }
}

/// Why a transient failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientKind {
    Timeout,
    RateLimit,
}

impl fmt::Display for TransientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransientKind::Timeout => write!(f, "timeout"),
            TransientKind::RateLimit => write!(f, "rate limit"),
        }
    }
}

/// Failure of a single delegated call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    #[error("transient {kind}: {message}")]
    Transient { kind: TransientKind, message: String },

    #[error("{0}")]
    Permanent(String),
}

impl CallError {
    pub fn timeout(message: impl Into<String>) -> Self {
        CallError::Transient {
            kind: TransientKind::Timeout,
            message: message.into(),
        }
    }

    pub fn rate_limit(message: impl Into<String>) -> Self {
        CallError::Transient {
            kind: TransientKind::RateLimit,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        CallError::Permanent(message.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, CallError::Transient { .. })
    }
}

/// One delegated call to one agent.
///
/// Implementations must not touch workflow state; they see only the payload.
#[async_trait]
pub trait AgentCall: Send + Sync {
    async fn call(&self, profile: &AgentProfile, payload: &Payload) -> Result<String, CallError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_without_upstream_is_prompt() {
        let payload = Payload::new("plan", CommandKind::Plan, "Write a plan.");
        assert_eq!(payload.render(), "Write a plan.");
    }

    #[test]
    fn render_appends_upstream_sections_in_order() {
        let mut payload = Payload::new("tasks", CommandKind::Tasks, "Break it down.\n");
        payload.upstream.push(Upstream {
            item: "specify".into(),
            agent: "generic".into(),
            output: "SPEC\n".into(),
        });
        payload.upstream.push(Upstream {
            item: "plan".into(),
            agent: "archie".into(),
            output: "PLAN".into(),
        });
        let rendered = payload.render();
        let spec_at = rendered.find("## Output of specify (by generic)").unwrap();
        let plan_at = rendered.find("## Output of plan (by archie)").unwrap();
        assert!(spec_at < plan_at);
        assert!(rendered.starts_with("Break it down.\n\n## Output of specify"));
    }

    #[test]
    fn transient_classification() {
        assert!(CallError::timeout("slow").is_transient());
        assert!(CallError::rate_limit("429").is_transient());
        assert!(!CallError::permanent("bad request").is_transient());
        assert_eq!(
            CallError::rate_limit("try later").to_string(),
            "transient rate limit: try later"
        );
    }
}
