//! Implementation of the `specrun agents` commands.

use specrun::agent::{AgentProfile, CapabilityRegistry};
use specrun::config::Config;
use specrun::context::WorkspaceContext;
use specrun::error::{Result, SpecrunError};
use specrun::session::load_catalog;
use std::fmt::Write as _;

pub fn cmd_list(ctx: &WorkspaceContext, config: &Config, all: bool) -> Result<()> {
    let registry = CapabilityRegistry::from_config(&load_catalog(ctx, config)?);
    print!("{}", render_list(&registry, all));
    Ok(())
}

pub fn cmd_show(ctx: &WorkspaceContext, config: &Config, name: &str) -> Result<()> {
    let registry = CapabilityRegistry::from_config(&load_catalog(ctx, config)?);
    print!("{}", render_profile(&registry, name)?);
    Ok(())
}

pub(crate) fn render_list(registry: &CapabilityRegistry, all: bool) -> String {
    let profiles = registry.list(all);
    let mut out = String::new();
    let _ = writeln!(out, "Agents ({}):", profiles.len());
    for profile in profiles {
        let mut flags = Vec::new();
        if profile.default {
            flags.push("default");
        }
        if !profile.enabled {
            flags.push("disabled");
        }
        let flags = if flags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", flags.join(", "))
        };
        let _ = writeln!(
            out,
            "  {:<16} p{:<3} {}{}",
            profile.name,
            profile.priority,
            capability_list(profile),
            flags
        );
    }
    out
}

pub(crate) fn render_profile(registry: &CapabilityRegistry, name: &str) -> Result<String> {
    let profile = registry
        .get(name)
        .ok_or_else(|| SpecrunError::UnknownAgent(name.to_string()))?;
    let defaults = registry.defaults();

    let mut out = String::new();
    let _ = writeln!(out, "Agent: {}", profile.name);
    let _ = writeln!(out, "  Role:           {}", profile.role);
    if let Some(spec) = &profile.specialization {
        let _ = writeln!(out, "  Specialization: {}", spec);
    }
    let _ = writeln!(out, "  Capabilities:   {}", capability_list(profile));
    let _ = writeln!(out, "  Priority:       {}", profile.priority);
    let _ = writeln!(
        out,
        "  Status:         {}{}",
        if profile.enabled { "enabled" } else { "disabled" },
        if profile.default { " (fallback)" } else { "" }
    );
    let _ = writeln!(out, "  Timeout:        {}s", profile.effective_timeout(defaults));
    if let Some(command) = profile.effective_command(defaults) {
        let _ = writeln!(out, "  Command:        {}", command);
    }
    if let Some(prompt) = &profile.prompt {
        let _ = writeln!(out, "  Prompt:         {} line(s)", prompt.lines().count());
    }
    Ok(out)
}

fn capability_list(profile: &AgentProfile) -> String {
    if profile.capabilities.is_empty() {
        return "-".to_string();
    }
    profile
        .capabilities
        .iter()
        .map(|c| c.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
