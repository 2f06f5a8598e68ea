//! Implementation of the `specrun init` command.
//!
//! Creates the `.specrun/` state directory with:
//! - `config.yaml`: every setting at its default
//! - `agents.yaml`: a sample catalog covering the workflow's capabilities
//! - `.gitignore`: keeps `locks/` and per-feature logs out of version control
//!
//! Existing files are left alone unless `--force` is given. `init` is not
//! required; every command works with built-in defaults.

use specrun::agent::AgentsConfig;
use specrun::config::Config;
use specrun::context::WorkspaceContext;
use specrun::error::Result;
use specrun::fs::atomic_write;
use std::path::PathBuf;

const SAMPLE_AGENTS: &str = r#"# Agent catalog. Capabilities decide who is picked for each command:
#   score = (matching capabilities) * priority, highest first.
# The agent marked `default: true` (or a built-in `generic` one) is the
# fallback and is always tried last.
#
# Command templates are split shell-style. Variables: {agent} {role} {item}
# {command} {prompt_file} {workdir}. The prompt is also piped on stdin;
# stdout is the generated document.

defaults:
  timeout_seconds: 600
  max_candidates: 3
  command: "claude -p"

agents:
  generic:
    role: generic
    default: true

  architect:
    role: software architect
    capabilities: [architecture_design, component_design, security]
    priority: 10

  planner:
    role: project manager
    capabilities: [project_management, task_breakdown]
    priority: 8

  engineer:
    role: full-stack engineer
    capabilities: [backend_implementation, frontend_implementation]
    priority: 8

  reviewer:
    role: code reviewer
    capabilities: [code_quality, code_review, quality_assurance, testing]
    priority: 6
"#;

const GITIGNORE: &str = "locks/\nfeatures/*/logs/\n";

pub fn cmd_init(ctx: &WorkspaceContext, force: bool) -> Result<()> {
    let written = init_workspace(ctx, force)?;

    if written.is_empty() {
        println!("specrun is already initialized in {}", ctx.state_dir.display());
        println!("Use --force to overwrite the config and agent catalog.");
        return Ok(());
    }

    println!("Initialized specrun in {}", ctx.root.display());
    println!();
    for path in &written {
        let shown = path.strip_prefix(&ctx.root).unwrap_or(path);
        println!("  {}", shown.display());
    }
    println!();
    println!("Next: edit agents.yaml, then `specrun run specify --input \"...\"`.");
    Ok(())
}

/// Write the scaffolding files, returning those actually written.
pub(crate) fn init_workspace(ctx: &WorkspaceContext, force: bool) -> Result<Vec<PathBuf>> {
    let config = Config::default();
    // Fail before writing anything if the sample does not load.
    AgentsConfig::from_yaml(SAMPLE_AGENTS)?;

    let config_yaml = format!(
        "# specrun configuration. Every key is optional.\n{}",
        config.to_yaml()?
    );
    let files = [
        (ctx.config_path(), config_yaml),
        (ctx.agents_file(&config), SAMPLE_AGENTS.to_string()),
        (ctx.state_dir.join(".gitignore"), GITIGNORE.to_string()),
    ];

    let mut written = Vec::new();
    for (path, content) in files {
        if path.exists() && !force {
            tracing::debug!(path = %path.display(), "keeping existing file");
            continue;
        }
        atomic_write(&path, content.as_bytes())?;
        written.push(path);
    }
    Ok(written)
}
