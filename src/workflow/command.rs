//! Workflow commands and the static knowledge attached to each one.

use crate::agent::Capability;
use crate::error::SpecrunError;
use crate::workflow::Phase;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A kind of work a request can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Constitution,
    Specify,
    Clarify,
    Plan,
    Tasks,
    Implement,
    Analyze,
    Checklist,
}

impl CommandKind {
    pub const ALL: [CommandKind; 8] = [
        CommandKind::Constitution,
        CommandKind::Specify,
        CommandKind::Clarify,
        CommandKind::Plan,
        CommandKind::Tasks,
        CommandKind::Implement,
        CommandKind::Analyze,
        CommandKind::Checklist,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Constitution => "constitution",
            CommandKind::Specify => "specify",
            CommandKind::Clarify => "clarify",
            CommandKind::Plan => "plan",
            CommandKind::Tasks => "tasks",
            CommandKind::Implement => "implement",
            CommandKind::Analyze => "analyze",
            CommandKind::Checklist => "checklist",
        }
    }

    /// Capabilities required when the agent catalog does not override them.
    pub fn default_requirements(&self) -> &'static [Capability] {
        use Capability::*;
        match self {
            CommandKind::Constitution => &[ProjectManagement],
            CommandKind::Specify | CommandKind::Clarify => &[],
            CommandKind::Plan => &[ArchitectureDesign, ComponentDesign],
            CommandKind::Tasks => &[ProjectManagement, TaskBreakdown],
            CommandKind::Implement => &[BackendImplementation, FrontendImplementation],
            CommandKind::Analyze => &[CodeQuality, CodeReview],
            CommandKind::Checklist => &[QualityAssurance, Testing],
        }
    }

    /// The phase a successful run of this command completes, if any.
    ///
    /// Auxiliary commands return `None` and never advance the workflow.
    pub fn completes(&self) -> Option<Phase> {
        match self {
            CommandKind::Specify => Some(Phase::Draft),
            CommandKind::Plan => Some(Phase::Specified),
            CommandKind::Tasks => Some(Phase::Planned),
            CommandKind::Implement => Some(Phase::Tasked),
            _ => None,
        }
    }

    /// Commands whose artifact this command reads as input.
    pub fn prerequisites(&self) -> &'static [CommandKind] {
        match self {
            CommandKind::Plan => &[CommandKind::Specify],
            CommandKind::Tasks => &[CommandKind::Plan],
            CommandKind::Implement => &[CommandKind::Tasks],
            CommandKind::Analyze => &[CommandKind::Tasks],
            CommandKind::Clarify | CommandKind::Checklist => &[CommandKind::Specify],
            CommandKind::Constitution | CommandKind::Specify => &[],
        }
    }

    /// File name of the document this command produces in the feature's spec directory.
    pub fn artifact_name(&self) -> &'static str {
        match self {
            CommandKind::Constitution => "constitution.md",
            CommandKind::Specify => "spec.md",
            CommandKind::Clarify => "clarifications.md",
            CommandKind::Plan => "plan.md",
            CommandKind::Tasks => "tasks.md",
            CommandKind::Implement => "implementation.md",
            CommandKind::Analyze => "analysis.md",
            CommandKind::Checklist => "checklist.md",
        }
    }

    /// Whether the command needs free-form user input to do anything useful.
    pub fn requires_input(&self) -> bool {
        matches!(self, CommandKind::Specify | CommandKind::Constitution)
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandKind {
    type Err = SpecrunError;

    /// Accepts `plan`, `/plan` and `/speckit.plan`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_start_matches('/');
        let name = trimmed.strip_prefix("speckit.").unwrap_or(trimmed);
        let name = name.to_lowercase();
        CommandKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == name)
            .ok_or_else(|| {
                let valid: Vec<&str> = CommandKind::ALL.iter().map(|k| k.as_str()).collect();
                SpecrunError::UserError(format!(
                    "unknown command '{}' (valid: {})",
                    s,
                    valid.join(", ")
                ))
            })
    }
}
