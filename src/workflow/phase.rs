//! Workflow phases, in order.

use crate::error::SpecrunError;
use crate::workflow::CommandKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Where a feature stands in the spec-driven workflow.
///
/// Ordering follows the workflow: `Draft < Specified < ... < Completed`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Draft,
    Specified,
    Planned,
    Tasked,
    Implementing,
    Completed,
}

impl Phase {
    pub const ALL: [Phase; 6] = [
        Phase::Draft,
        Phase::Specified,
        Phase::Planned,
        Phase::Tasked,
        Phase::Implementing,
        Phase::Completed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Draft => "draft",
            Phase::Specified => "specified",
            Phase::Planned => "planned",
            Phase::Tasked => "tasked",
            Phase::Implementing => "implementing",
            Phase::Completed => "completed",
        }
    }

    /// The successor phase. `Completed` is terminal and has none.
    pub fn next(&self) -> Option<Phase> {
        match self {
            Phase::Draft => Some(Phase::Specified),
            Phase::Specified => Some(Phase::Planned),
            Phase::Planned => Some(Phase::Tasked),
            Phase::Tasked => Some(Phase::Implementing),
            Phase::Implementing => Some(Phase::Completed),
            Phase::Completed => None,
        }
    }

    /// The command whose success completes this phase.
    ///
    /// `Implementing` is closed explicitly, so it has no completing command.
    pub fn completing_command(&self) -> Option<CommandKind> {
        CommandKind::ALL
            .iter()
            .copied()
            .find(|k| k.completes() == Some(*self))
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = SpecrunError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_lowercase();
        Phase::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == name)
            .ok_or_else(|| {
                let valid: Vec<&str> = Phase::ALL.iter().map(|p| p.as_str()).collect();
                SpecrunError::UserError(format!(
                    "unknown phase '{}' (valid: {})",
                    s,
                    valid.join(", ")
                ))
            })
    }
}
