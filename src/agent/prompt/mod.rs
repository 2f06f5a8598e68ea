//! Prompt construction for workflow commands.
//!
//! Each command has a built-in template; the agent catalog may replace any of
//! them under `prompt_templates`. Templates see these variables:
//!
//! - `{feature}` - feature id (e.g. `001-user-login`)
//! - `{command}` - command name
//! - `{input}` - free-form user input, empty when none was given
//! - `{context}` - prerequisite artifacts already on disk, rendered as sections

mod template;

pub use template::{Template, TemplateError, Vars, render_template, vars};

use crate::error::{Result, SpecrunError};
use crate::workflow::CommandKind;
use std::collections::BTreeMap;

/// Variables a prompt template may reference.
pub const PROMPT_VARIABLES: [&str; 4] = ["feature", "command", "input", "context"];

/// What a prompt is built from.
#[derive(Debug, Clone, Default)]
pub struct PromptInput {
    pub feature: String,
    pub input: Option<String>,
    /// Existing prerequisite artifacts, as `(command, content)`.
    pub context: Vec<(CommandKind, String)>,
}

/// Parsed prompt templates, one per command.
#[derive(Debug, Clone)]
pub struct PromptLibrary {
    templates: BTreeMap<CommandKind, Template>,
}

impl PromptLibrary {
    /// Built-in templates with catalog overrides applied.
    ///
    /// Overrides are parsed and checked against [`PROMPT_VARIABLES`] here, so a
    /// typo surfaces at session start rather than mid-batch.
    pub fn with_overrides(overrides: &BTreeMap<CommandKind, String>) -> Result<Self> {
        let mut templates = BTreeMap::new();
        for kind in CommandKind::ALL {
            let (source, origin) = match overrides.get(&kind) {
                Some(custom) => (custom.as_str(), "agents.yaml"),
                None => (builtin_template(kind), "built-in"),
            };
            let template = Template::parse(source).map_err(|e| {
                SpecrunError::ConfigError(format!("{} prompt template for '{}': {}", origin, kind, e))
            })?;
            if let Some(unknown) = template
                .variables()
                .into_iter()
                .find(|v| !PROMPT_VARIABLES.contains(v))
            {
                return Err(SpecrunError::ConfigError(format!(
                    "{} prompt template for '{}' uses unknown variable '{{{}}}' (available: {})",
                    origin,
                    kind,
                    unknown,
                    PROMPT_VARIABLES.join(", ")
                )));
            }
            templates.insert(kind, template);
        }
        Ok(Self { templates })
    }

    pub fn builtin() -> Result<Self> {
        Self::with_overrides(&BTreeMap::new())
    }

    /// Render the prompt for `kind`.
    pub fn build(&self, kind: CommandKind, input: &PromptInput) -> Result<String> {
        let template = self.templates.get(&kind).ok_or_else(|| {
            SpecrunError::ConfigError(format!("no prompt template for '{}'", kind))
        })?;

        let context = input
            .context
            .iter()
            .map(|(k, body)| format!("## Existing {} ({})\n\n{}", k, k.artifact_name(), body.trim()))
            .collect::<Vec<_>>()
            .join("\n\n");

        let vars = vars([
            ("feature", input.feature.clone()),
            ("command", kind.as_str().to_string()),
            ("input", input.input.clone().unwrap_or_default()),
            ("context", context),
        ]);

        template
            .render(&vars)
            .map_err(|e| SpecrunError::ConfigError(format!("prompt for '{}': {}", kind, e)))
    }
}

fn builtin_template(kind: CommandKind) -> &'static str {
    match kind {
        CommandKind::Constitution => {
            "Create a project constitution for {feature} defining the principles, \
standards and guidelines every later phase must follow.

{input}

Cover: core principles, technical standards, testing expectations, \
security requirements and the decision process. Output markdown only."
        }
        CommandKind::Specify => {
            "Create a detailed feature specification for:

{input}

Use this structure:

# Feature Specification: [Feature Name]
## Overview
## User Stories (prioritized P1..P4)
## Functional Requirements (FR-001, FR-002, ...)
## Non-Functional Requirements
## Constraints & Dependencies
## Edge Cases & Error Handling

{context}"
        }
        CommandKind::Clarify => {
            "Identify ambiguities or underspecified areas in the specification below \
and ask up to 5 clarification questions. For each give the question, why it matters \
and the plausible answers.

{context}

{input}"
        }
        CommandKind::Plan => {
            "Based on the feature specification below, create a detailed implementation plan.

{context}

Use this structure:

# Implementation Plan
## Technical Context
## Architecture & Design
## Data Model
## API Contracts
## Testing Strategy
## Deployment Plan

{input}"
        }
        CommandKind::Tasks => {
            "Based on the specification and implementation plan below, create a task breakdown.

{context}

Group tasks by phase (setup, foundation, one phase per user story, polish). \
Give every task an id (T001, T002, ...), mark tasks that can run in parallel with [P] \
and name the files each task touches.

{input}"
        }
        CommandKind::Implement => {
            "Produce implementation guidance for the tasks below.

{context}

For each task give the approach, the code changes, the tests to add \
and how to verify completion.

{input}"
        }
        CommandKind::Analyze => {
            "Analyze the following artifacts for consistency, completeness and quality.

{context}

Report contradictions between artifacts, requirements without tasks, \
risky assumptions and concrete recommendations.

{input}"
        }
        CommandKind::Checklist => {
            "Generate a quality checklist for this feature from the artifacts below.

{context}

Include pre-implementation, implementation, testing and release items as \
markdown checkboxes.

{input}"
        }
    }
}
