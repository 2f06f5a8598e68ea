//! Subprocess implementation of [`AgentCall`].
//!
//! The agent's command template is rendered, split with shell-words and run
//! with the rendered prompt both written to `{prompt_file}` and piped on stdin.
//! Stdout is the call's output. Logs land in `<logs_dir>/<item>/`.
//!
//! Failure classification:
//! - timeout: transient
//! - exit code 75 (`EX_TEMPFAIL`) or a rate-limit marker in stderr: transient
//! - anything else: permanent

use super::{AgentCall, CallError, Payload};
use crate::agent::AgentProfile;
use crate::agent::config::AgentDefaults;
use crate::agent::prompt::{TemplateError, render_template, vars};
use async_trait::async_trait;
use regex::Regex;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Exit code agents use to signal "try again later".
pub const EXIT_TEMPFAIL: i32 = 75;

/// Stderr text that marks a rate-limit failure. A bare `429` must follow
/// `HTTP`, `status` or `code` so line numbers and ports do not match.
static RATE_LIMIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)rate[ _-]?limit|too many requests|\b(?:http(?:/[\d.]+)?|status|code)[ :=]*429\b")
        .expect("valid regex")
});

/// Runs agents as subprocesses.
#[derive(Debug, Clone)]
pub struct CommandAgentCall {
    work_dir: PathBuf,
    logs_dir: PathBuf,
    defaults: AgentDefaults,
}

impl CommandAgentCall {
    pub fn new(work_dir: impl Into<PathBuf>, logs_dir: impl Into<PathBuf>, defaults: AgentDefaults) -> Self {
        Self {
            work_dir: work_dir.into(),
            logs_dir: logs_dir.into(),
            defaults,
        }
    }
}

#[async_trait]
impl AgentCall for CommandAgentCall {
    async fn call(&self, profile: &AgentProfile, payload: &Payload) -> Result<String, CallError> {
        let template = profile.effective_command(&self.defaults).ok_or_else(|| {
            CallError::permanent(format!(
                "agent '{}' has no command configured (set `command` on the agent or under `defaults`)",
                profile.name
            ))
        })?;

        let item_logs = self.logs_dir.join(sanitize(&payload.item));
        tokio::fs::create_dir_all(&item_logs).await.map_err(|e| {
            CallError::permanent(format!(
                "failed to create agent logs directory '{}': {}",
                item_logs.display(),
                e
            ))
        })?;

        let agent_slug = sanitize(&profile.name);
        let prompt = compose_prompt(profile, payload);
        let prompt_file = item_logs.join(format!("{}.prompt.md", agent_slug));
        tokio::fs::write(&prompt_file, &prompt).await.map_err(|e| {
            CallError::permanent(format!(
                "failed to write prompt file '{}': {}",
                prompt_file.display(),
                e
            ))
        })?;

        let variables = vars([
            ("agent", profile.name.clone()),
            ("role", profile.role.clone()),
            ("item", payload.item.clone()),
            ("command", payload.kind.as_str().to_string()),
            ("prompt_file", prompt_file.display().to_string()),
            ("workdir", self.work_dir.display().to_string()),
        ]);
        let command_line = render_template(template, &variables).map_err(|e| match e {
            TemplateError::UndefinedVariable { name, .. } => CallError::permanent(format!(
                "agent '{}' command references undefined variable '{}' (available: {})",
                profile.name,
                name,
                variables.keys().cloned().collect::<Vec<_>>().join(", ")
            )),
            other => CallError::permanent(format!("agent '{}' command: {}", profile.name, other)),
        })?;

        let args = shell_words::split(&command_line).map_err(|e| {
            CallError::permanent(format!(
                "failed to parse agent command '{}': {}",
                command_line, e
            ))
        })?;
        let Some((program, rest)) = args.split_first() else {
            return Err(CallError::permanent(format!(
                "agent '{}' command is empty",
                profile.name
            )));
        };

        let mut child = Command::new(program)
            .args(rest)
            .current_dir(&self.work_dir)
            .envs(&profile.environment)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                CallError::permanent(format!(
                    "failed to execute agent command '{}': {} (is it installed and in PATH?)",
                    program, e
                ))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            let bytes = prompt.into_bytes();
            // A child that never reads stdin closes the pipe early; that is fine.
            tokio::spawn(async move {
                let _ = stdin.write_all(&bytes).await;
            });
        }

        let timeout = Duration::from_secs(profile.effective_timeout(&self.defaults));
        tracing::debug!(agent = %profile.name, item = %payload.item, command = %command_line, "spawned agent");

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(CallError::permanent(format!(
                    "failed waiting for agent '{}': {}",
                    profile.name, e
                )));
            }
            // Dropping the child future kills the process.
            Err(_) => {
                return Err(CallError::timeout(format!(
                    "agent '{}' did not finish within {}s",
                    profile.name,
                    timeout.as_secs()
                )));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        write_log(item_logs.join(format!("{}.stdout.log", agent_slug)), &stdout).await;
        write_log(item_logs.join(format!("{}.stderr.log", agent_slug)), &stderr).await;

        if output.status.success() {
            if stdout.trim().is_empty() {
                return Err(CallError::permanent(format!(
                    "agent '{}' exited successfully but produced no output",
                    profile.name
                )));
            }
            return Ok(stdout);
        }

        Err(classify_failure(&profile.name, output.status.code(), &stderr))
    }
}

/// System prompt (if any) followed by the payload.
fn compose_prompt(profile: &AgentProfile, payload: &Payload) -> String {
    match profile.prompt.as_deref().map(str::trim) {
        Some(system) if !system.is_empty() => format!("{}\n\n---\n\n{}", system, payload.render()),
        _ => payload.render(),
    }
}

/// Map a non-zero exit to a call error.
pub fn classify_failure(agent: &str, code: Option<i32>, stderr: &str) -> CallError {
    let tail = stderr
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("")
        .trim();
    let exit = code.map_or_else(|| "signal".to_string(), |c| c.to_string());
    let message = if tail.is_empty() {
        format!("agent '{}' failed (exit {})", agent, exit)
    } else {
        format!("agent '{}' failed (exit {}): {}", agent, exit, tail)
    };

    if code == Some(EXIT_TEMPFAIL) || RATE_LIMIT.is_match(stderr) {
        CallError::rate_limit(message)
    } else {
        CallError::permanent(message)
    }
}

async fn write_log(path: PathBuf, content: &str) {
    if let Err(e) = tokio::fs::write(&path, content).await {
        tracing::warn!("failed to write agent log '{}': {}", path.display(), e);
    }
}

/// Keep ids and names safe as single path components.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
        .collect::<String>()
        .trim_start_matches('.')
        .to_string()
}
