//! Git command runner.
//!
//! Only used for workspace detection: the repository root and the current
//! branch (which names the active feature).

use crate::error::{Result, SpecrunError};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

/// Result of a successful git command execution.
#[derive(Debug, Clone)]
pub struct GitOutput {
    /// Standard output from the command (trimmed).
    pub stdout: String,
    /// Standard error from the command (trimmed).
    pub stderr: String,
}

impl GitOutput {
    fn from_output(output: &Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }
    }
}

/// Run a git command in `cwd`.
///
/// A non-zero exit maps to `SpecrunError::GitError` (exit code 3).
pub fn run_git<P: AsRef<Path>>(cwd: P, args: &[&str]) -> Result<GitOutput> {
    let output = Command::new("git")
        .current_dir(cwd.as_ref())
        .args(args)
        .output()
        .map_err(|e| {
            SpecrunError::GitError(format!(
                "failed to execute git {}: {}",
                args.first().unwrap_or(&""),
                e
            ))
        })?;

    let git_output = GitOutput::from_output(&output);
    if output.status.success() {
        return Ok(git_output);
    }

    let message = if git_output.stderr.is_empty() {
        git_output.stdout
    } else {
        git_output.stderr
    };
    Err(SpecrunError::GitError(format!(
        "git {} failed (exit code {}): {}",
        args.first().unwrap_or(&""),
        output.status.code().unwrap_or(-1),
        message
    )))
}

/// Repository toplevel containing `cwd`, or `None` outside a repository
/// (or when git is not installed).
pub fn repo_root<P: AsRef<Path>>(cwd: P) -> Option<PathBuf> {
    run_git(cwd, &["rev-parse", "--show-toplevel"])
        .ok()
        .map(|out| PathBuf::from(out.stdout))
        .filter(|p| !p.as_os_str().is_empty())
}

/// Name of the checked-out branch; `None` when detached or outside a repository.
pub fn current_branch<P: AsRef<Path>>(cwd: P) -> Option<String> {
    let out = run_git(cwd, &["rev-parse", "--abbrev-ref", "HEAD"]).ok()?;
    match out.stdout.as_str() {
        "" | "HEAD" => None,
        name => Some(name.to_string()),
    }
}
