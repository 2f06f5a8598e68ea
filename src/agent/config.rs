//! Agent catalog schema.
//!
//! The catalog is read once at session start, either from `agents.yaml` or
//! from a directory of markdown agent files with YAML frontmatter.
//!
//! # File Format
//!
//! ```yaml
//! agents:
//!   archie-architect:
//!     role: architect
//!     specialization: distributed systems
//!     capabilities: [architecture_design, component_design]
//!     priority: 10
//!     command: "claude -p --system-prompt-file {prompt_file}"
//!
//!   generic:
//!     role: generic
//!     default: true
//!     priority: 0
//!
//! defaults:
//!   timeout_seconds: 600
//!   max_candidates: 3
//!   command: "llm-run {agent} {prompt_file}"
//!
//! requirements:
//!   plan: [architecture_design]
//!
//! prompt_templates:
//!   plan: |
//!     Write a plan for {feature} from:
//!     {context}
//! ```
//!
//! Enabled flags are session state; nothing here is ever written back.

use crate::agent::Capability;
use crate::error::{Result, SpecrunError};
use crate::workflow::CommandKind;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

/// Default timeout for a delegated call in seconds.
const DEFAULT_TIMEOUT_SECONDS: u64 = 600;

/// Default number of candidates kept by capability selection.
const DEFAULT_MAX_CANDIDATES: usize = 3;

/// Role label that marks the fallback agent in frontmatter catalogs.
pub const GENERIC_ROLE: &str = "generic";

/// The whole agent catalog.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentsConfig {
    /// Profiles keyed by identifier, in file order (file order is registration order).
    pub agents: IndexMap<String, AgentProfile>,

    pub defaults: AgentDefaults,

    /// Per-command capability requirements overriding the built-in table.
    pub requirements: BTreeMap<CommandKind, Vec<Capability>>,

    /// Per-command prompt templates overriding the built-in ones.
    pub prompt_templates: BTreeMap<CommandKind, String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// Settings applied to every agent that does not override them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentDefaults {
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,

    /// Command template used by agents without their own `command`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout_seconds(),
            max_candidates: default_max_candidates(),
            command: None,
        }
    }
}

fn default_timeout_seconds() -> u64 {
    DEFAULT_TIMEOUT_SECONDS
}

fn default_max_candidates() -> usize {
    DEFAULT_MAX_CANDIDATES
}

fn default_priority() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

/// A named agent with declared capabilities and a selection priority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    /// Unique name; filled from the map key or file stem when omitted.
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub role: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specialization: Option<String>,

    /// Ordered, deduplicated on load.
    #[serde(default)]
    pub capabilities: Vec<Capability>,

    /// Tie-break weight; higher means more specialized.
    #[serde(default = "default_priority")]
    pub priority: u32,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Marks the fallback profile.
    #[serde(default)]
    pub default: bool,

    /// System prompt body sent ahead of the work payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,

    /// Subprocess command template (see `agent::dispatch`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub environment: HashMap<String, String>,
}

impl AgentProfile {
    /// A bare profile with no capabilities, enabled, priority 1.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: String::new(),
            specialization: None,
            capabilities: Vec::new(),
            priority: default_priority(),
            enabled: true,
            default: false,
            prompt: None,
            command: None,
            timeout_seconds: None,
            environment: HashMap::new(),
        }
    }

    /// The built-in fallback installed when a catalog names none.
    pub fn builtin_generic() -> Self {
        Self {
            role: GENERIC_ROLE.to_string(),
            specialization: Some("general-purpose".to_string()),
            priority: 0,
            default: true,
            prompt: Some(
                "You are a versatile software engineering assistant. \
                 Produce complete, well-structured markdown documents."
                    .to_string(),
            ),
            ..Self::new(GENERIC_ROLE)
        }
    }

    pub fn with_capabilities(mut self, caps: impl IntoIterator<Item = Capability>) -> Self {
        self.capabilities = caps.into_iter().collect();
        self.dedup_capabilities();
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn as_default(mut self) -> Self {
        self.default = true;
        self.priority = 0;
        self
    }

    pub fn effective_timeout(&self, defaults: &AgentDefaults) -> u64 {
        self.timeout_seconds.unwrap_or(defaults.timeout_seconds)
    }

    pub fn effective_command<'a>(&'a self, defaults: &'a AgentDefaults) -> Option<&'a str> {
        self.command.as_deref().or(defaults.command.as_deref())
    }

    /// Drop repeated capabilities, keeping first occurrences in order.
    fn dedup_capabilities(&mut self) {
        let mut seen = HashSet::new();
        self.capabilities.retain(|c| seen.insert(*c));
    }
}

impl AgentsConfig {
    /// Load the catalog from a YAML file.
    ///
    /// Returns `Ok(None)` if the file does not exist.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Option<Self>> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            SpecrunError::ConfigError(format!(
                "failed to read agent catalog '{}': {}",
                path.display(),
                e
            ))
        })?;

        Self::from_yaml(&content).map(Some)
    }

    /// Parse, normalize and validate a catalog from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let mut config: AgentsConfig = serde_yaml::from_str(yaml)
            .map_err(|e| SpecrunError::ConfigError(format!("failed to parse agents.yaml: {}", e)))?;

        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Load a catalog from a directory of `*.md` agent files.
    ///
    /// Each file has YAML frontmatter with the profile fields and a body that
    /// becomes the agent's system prompt. Files are registered in file-name
    /// order. When no file is flagged `default`, the first agent whose role is
    /// `generic` becomes the fallback.
    pub fn load_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let entries = std::fs::read_dir(dir).map_err(|e| {
            SpecrunError::ConfigError(format!(
                "failed to read agents directory '{}': {}",
                dir.display(),
                e
            ))
        })?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                SpecrunError::ConfigError(format!("failed to read agents directory entry: {}", e))
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("md") {
                files.push(path);
            }
        }
        files.sort();

        let mut config = AgentsConfig::default();
        for path in files {
            let content = std::fs::read_to_string(&path).map_err(|e| {
                SpecrunError::ConfigError(format!(
                    "failed to read agent file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();
            let mut profile = parse_agent_markdown(&content).map_err(|e| {
                SpecrunError::ConfigError(format!("agent file '{}': {}", path.display(), e))
            })?;
            if profile.name.is_empty() {
                profile.name = stem.clone();
            }
            config.agents.insert(stem, profile);
        }

        if !config.agents.values().any(|a| a.default)
            && let Some(generic) = config.agents.values_mut().find(|a| a.role == GENERIC_ROLE)
        {
            generic.default = true;
            generic.priority = 0;
        }

        config.normalize();
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| {
            SpecrunError::ConfigError(format!("failed to serialize agent catalog: {}", e))
        })
    }

    fn normalize(&mut self) {
        for (id, agent) in self.agents.iter_mut() {
            if agent.name.is_empty() {
                agent.name = id.clone();
            }
            agent.dedup_capabilities();
        }
    }

    /// Validate the catalog.
    ///
    /// Rules:
    /// - timeouts and `max_candidates` must be positive
    /// - names must be non-empty and unique ignoring case
    /// - at most one agent can be marked as default
    /// - the default agent declares no capabilities and cannot start disabled
    pub fn validate(&self) -> Result<()> {
        if self.defaults.timeout_seconds == 0 {
            return Err(SpecrunError::ConfigError(
                "agents.yaml: defaults.timeout_seconds must be greater than 0".to_string(),
            ));
        }
        if self.defaults.max_candidates == 0 {
            return Err(SpecrunError::ConfigError(
                "agents.yaml: defaults.max_candidates must be greater than 0".to_string(),
            ));
        }

        let default_count = self.agents.values().filter(|a| a.default).count();
        if default_count > 1 {
            return Err(SpecrunError::ConfigError(
                "agents.yaml: at most one agent can be marked as default".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for (id, agent) in &self.agents {
            if agent.name.trim().is_empty() {
                return Err(SpecrunError::ConfigError(format!(
                    "agents.yaml: agent '{}' has an empty name",
                    id
                )));
            }
            if !names.insert(agent.name.to_lowercase()) {
                return Err(SpecrunError::ConfigError(format!(
                    "agents.yaml: duplicate agent name '{}' (names are case-insensitive)",
                    agent.name
                )));
            }
            if agent.timeout_seconds == Some(0) {
                return Err(SpecrunError::ConfigError(format!(
                    "agents.yaml: agent '{}' has timeout_seconds of 0",
                    agent.name
                )));
            }
            if agent.default && !agent.capabilities.is_empty() {
                return Err(SpecrunError::ConfigError(format!(
                    "agents.yaml: default agent '{}' must not declare capabilities",
                    agent.name
                )));
            }
            if agent.default && !agent.enabled {
                return Err(SpecrunError::ConfigError(format!(
                    "agents.yaml: default agent '{}' cannot be disabled",
                    agent.name
                )));
            }
        }

        Ok(())
    }

    /// The profile flagged as default, if any.
    pub fn default_agent(&self) -> Option<&AgentProfile> {
        self.agents.values().find(|a| a.default)
    }
}

/// Parse one markdown agent file: `---` YAML frontmatter `---` then the prompt body.
fn parse_agent_markdown(content: &str) -> std::result::Result<AgentProfile, String> {
    let normalized = content.replace("\r\n", "\n");
    let rest = normalized
        .strip_prefix("---\n")
        .ok_or_else(|| "must start with '---' frontmatter delimiter".to_string())?;

    let (yaml, body) = match rest.find("\n---") {
        Some(pos) => {
            let after = &rest[pos + 4..];
            let body = after.strip_prefix('\n').unwrap_or(after);
            (&rest[..pos], body)
        }
        None if rest.starts_with("---") => ("", rest.trim_start_matches("---")),
        None => return Err("missing closing '---' frontmatter delimiter".to_string()),
    };

    let mut profile: AgentProfile = if yaml.trim().is_empty() {
        AgentProfile::new("")
    } else {
        serde_yaml::from_str(yaml).map_err(|e| format!("invalid frontmatter: {}", e))?
    };

    let body = body.trim();
    if profile.prompt.is_none() && !body.is_empty() {
        profile.prompt = Some(body.to_string());
    }
    Ok(profile)
}
