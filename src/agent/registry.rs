//! Capability registry and selector.
//!
//! The registry owns the session's agent profiles and the command-to-capability
//! requirement table. Selection is a pure function of the registry snapshot and
//! the requested capability set:
//!
//! ```text
//! score = |capabilities ∩ required| * priority
//! ```
//!
//! Zero scores are discarded; the rest are ordered by score, then priority,
//! then registration order, and truncated to `max_candidates`.

use crate::agent::config::{AgentDefaults, AgentProfile, AgentsConfig};
use crate::agent::Capability;
use crate::error::{Result, SpecrunError};
use crate::workflow::CommandKind;
use std::collections::{BTreeMap, BTreeSet};

/// Session-scoped catalog of agent profiles.
#[derive(Debug, Clone)]
pub struct CapabilityRegistry {
    /// Registration order is significant for tie-breaking.
    profiles: Vec<AgentProfile>,
    default_index: usize,
    requirements: BTreeMap<CommandKind, Vec<Capability>>,
    defaults: AgentDefaults,
}

impl CapabilityRegistry {
    /// Build a registry from profiles in registration order.
    ///
    /// If none is flagged default, a built-in `generic` profile is appended.
    pub fn new(profiles: Vec<AgentProfile>) -> Self {
        Self::assemble(profiles, BTreeMap::new(), AgentDefaults::default())
    }

    pub fn from_config(config: &AgentsConfig) -> Self {
        Self::assemble(
            config.agents.values().cloned().collect(),
            config.requirements.clone(),
            config.defaults.clone(),
        )
    }

    fn assemble(
        mut profiles: Vec<AgentProfile>,
        requirements: BTreeMap<CommandKind, Vec<Capability>>,
        defaults: AgentDefaults,
    ) -> Self {
        let default_index = match profiles.iter().position(|p| p.default) {
            Some(idx) => idx,
            None => {
                tracing::debug!("no default agent in catalog, installing built-in generic");
                profiles.push(AgentProfile::builtin_generic());
                profiles.len() - 1
            }
        };

        // The fallback never scores and is never switched off.
        let fallback = &mut profiles[default_index];
        fallback.priority = 0;
        fallback.capabilities.clear();
        fallback.enabled = true;

        Self {
            profiles,
            default_index,
            requirements,
            defaults,
        }
    }

    pub fn defaults(&self) -> &AgentDefaults {
        &self.defaults
    }

    pub fn default_agent(&self) -> &AgentProfile {
        &self.profiles[self.default_index]
    }

    /// Case-insensitive lookup by name.
    pub fn get(&self, name: &str) -> Option<&AgentProfile> {
        self.position(name).map(|idx| &self.profiles[idx])
    }

    fn position(&self, name: &str) -> Option<usize> {
        let needle = name.trim().to_lowercase();
        self.profiles
            .iter()
            .position(|p| p.name.to_lowercase() == needle)
    }

    /// Profiles in registration order.
    pub fn list(&self, include_disabled: bool) -> Vec<&AgentProfile> {
        self.profiles
            .iter()
            .filter(|p| include_disabled || p.enabled)
            .collect()
    }

    /// Re-enable an agent for this session. Returns the canonical name.
    pub fn enable(&mut self, name: &str) -> Result<String> {
        let idx = self
            .position(name)
            .ok_or_else(|| SpecrunError::UnknownAgent(name.to_string()))?;
        self.profiles[idx].enabled = true;
        Ok(self.profiles[idx].name.clone())
    }

    /// Disable an agent for this session. Returns the canonical name.
    ///
    /// The default agent is protected.
    pub fn disable(&mut self, name: &str) -> Result<String> {
        let idx = self
            .position(name)
            .ok_or_else(|| SpecrunError::UnknownAgent(name.to_string()))?;
        if idx == self.default_index {
            return Err(SpecrunError::ProtectedAgent(
                self.profiles[idx].name.clone(),
            ));
        }
        self.profiles[idx].enabled = false;
        Ok(self.profiles[idx].name.clone())
    }

    /// Required capabilities for a command: catalog override, else built-in table.
    pub fn requirements_for(&self, kind: CommandKind) -> BTreeSet<Capability> {
        match self.requirements.get(&kind) {
            Some(caps) => caps.iter().copied().collect(),
            None => kind.default_requirements().iter().copied().collect(),
        }
    }

    /// Rank enabled agents against `required`.
    ///
    /// An empty requirement set yields the default agent alone. A non-empty set
    /// that nobody scores against yields an empty list.
    pub fn select(&self, required: &BTreeSet<Capability>, max_candidates: usize) -> Vec<AgentProfile> {
        if required.is_empty() {
            return vec![self.default_agent().clone()];
        }

        let mut scored: Vec<(u64, u32, usize)> = self
            .profiles
            .iter()
            .enumerate()
            .filter(|(_, p)| p.enabled)
            .filter_map(|(idx, p)| {
                let overlap = p
                    .capabilities
                    .iter()
                    .filter(|c| required.contains(c))
                    .count() as u64;
                let score = overlap * u64::from(p.priority);
                (score > 0).then_some((score, p.priority, idx))
            })
            .collect();

        scored.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.cmp(&a.1)).then(a.2.cmp(&b.2)));
        scored.truncate(max_candidates);

        let selected: Vec<AgentProfile> = scored
            .into_iter()
            .map(|(_, _, idx)| self.profiles[idx].clone())
            .collect();

        tracing::debug!(
            required = ?required.iter().map(|c| c.as_str()).collect::<Vec<_>>(),
            selected = ?selected.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
            "capability selection"
        );
        selected
    }

    /// Candidates for a command, falling back to the default agent when
    /// nothing scores.
    pub fn select_for_command(&self, kind: CommandKind) -> Vec<AgentProfile> {
        let required = self.requirements_for(kind);
        let selected = self.select(&required, self.defaults.max_candidates);
        if selected.is_empty() {
            tracing::info!(command = %kind, "no specialized agent matched, using default");
            vec![self.default_agent().clone()]
        } else {
            selected
        }
    }

    /// Map an explicit, ordered list of names to profiles.
    ///
    /// Disabled agents named explicitly are still honoured.
    pub fn resolve_override(&self, names: &[String]) -> Result<Vec<AgentProfile>> {
        names
            .iter()
            .map(|name| {
                self.get(name)
                    .cloned()
                    .ok_or_else(|| SpecrunError::UnknownAgent(name.clone()))
            })
            .collect()
    }
}
