//! Closed set of capability tags an agent can declare.
//!
//! Tags are validated when the agent catalog loads; an unknown tag is a
//! configuration error rather than a silent non-match at selection time.

use crate::error::SpecrunError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A capability an agent profile declares and a work kind may require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    ArchitectureDesign,
    ComponentDesign,
    ProjectManagement,
    TaskBreakdown,
    BackendImplementation,
    FrontendImplementation,
    CodeQuality,
    CodeReview,
    QualityAssurance,
    Testing,
    Documentation,
    Security,
}

impl Capability {
    /// Every capability, in declaration order.
    pub const ALL: [Capability; 12] = [
        Capability::ArchitectureDesign,
        Capability::ComponentDesign,
        Capability::ProjectManagement,
        Capability::TaskBreakdown,
        Capability::BackendImplementation,
        Capability::FrontendImplementation,
        Capability::CodeQuality,
        Capability::CodeReview,
        Capability::QualityAssurance,
        Capability::Testing,
        Capability::Documentation,
        Capability::Security,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::ArchitectureDesign => "architecture_design",
            Capability::ComponentDesign => "component_design",
            Capability::ProjectManagement => "project_management",
            Capability::TaskBreakdown => "task_breakdown",
            Capability::BackendImplementation => "backend_implementation",
            Capability::FrontendImplementation => "frontend_implementation",
            Capability::CodeQuality => "code_quality",
            Capability::CodeReview => "code_review",
            Capability::QualityAssurance => "quality_assurance",
            Capability::Testing => "testing",
            Capability::Documentation => "documentation",
            Capability::Security => "security",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = SpecrunError;

    /// Accepts `snake_case`, `kebab-case` and any letter case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        Capability::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| {
                let valid: Vec<&str> = Capability::ALL.iter().map(|c| c.as_str()).collect();
                SpecrunError::ConfigError(format!(
                    "unknown capability '{}' (valid: {})",
                    s,
                    valid.join(", ")
                ))
            })
    }
}

/// Parse a comma-separated capability list, e.g. from a CLI flag.
pub fn parse_capability_list(list: &str) -> crate::error::Result<Vec<Capability>> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(Capability::from_str)
        .collect()
}
