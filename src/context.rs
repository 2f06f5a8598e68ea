//! Workspace and feature resolution.
//!
//! Every command resolves a [`WorkspaceContext`] first: the workspace root
//! (the git toplevel, or the working directory outside a repository) and the
//! fixed layout of the `.specrun/` state directory beneath it.
//!
//! ```text
//! .specrun/
//!   config.yaml
//!   agents.yaml            (or agents/*.md)
//!   locks/<feature>.lock
//!   features/<feature>/workflow.json
//!   features/<feature>/events.ndjson
//! specs/<feature>/*.md     (generated artifacts)
//! ```

use crate::config::Config;
use crate::error::{Result, SpecrunError};
use crate::git;
use regex::Regex;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// State directory name relative to the workspace root.
pub const STATE_DIR: &str = ".specrun";

/// Feature branches look like `004-login-flow`.
static FEATURE_BRANCH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{3})-([a-z0-9-]+)$").expect("valid regex"));

static FEATURE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("valid regex"));

/// Resolved workspace paths. All paths are absolute.
#[derive(Debug, Clone)]
pub struct WorkspaceContext {
    pub root: PathBuf,
    pub state_dir: PathBuf,
    pub locks_dir: PathBuf,
    pub features_dir: PathBuf,
}

impl WorkspaceContext {
    /// Resolve from the current working directory.
    pub fn resolve() -> Result<Self> {
        let cwd = env::current_dir().map_err(|e| {
            SpecrunError::UserError(format!("failed to get current working directory: {}", e))
        })?;
        Self::resolve_from(&cwd)
    }

    pub fn resolve_from<P: AsRef<Path>>(cwd: P) -> Result<Self> {
        let cwd = cwd.as_ref();
        let root = match git::repo_root(cwd) {
            Some(root) => root,
            None => cwd.canonicalize().map_err(|e| {
                SpecrunError::UserError(format!(
                    "failed to resolve workspace directory '{}': {}",
                    cwd.display(),
                    e
                ))
            })?,
        };
        Ok(Self::at(root))
    }

    /// Layout rooted at `root` without any detection.
    pub fn at(root: PathBuf) -> Self {
        let state_dir = root.join(STATE_DIR);
        Self {
            locks_dir: state_dir.join("locks"),
            features_dir: state_dir.join("features"),
            state_dir,
            root,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.config_path().is_file()
    }

    pub fn config_path(&self) -> PathBuf {
        self.state_dir.join("config.yaml")
    }

    /// Append-only event log of one feature.
    pub fn feature_events_file(&self, feature: &str) -> PathBuf {
        self.feature_state_dir(feature).join("events.ndjson")
    }

    pub fn agents_file(&self, config: &Config) -> PathBuf {
        self.state_dir.join(&config.agents_file)
    }

    pub fn agents_dir(&self, config: &Config) -> PathBuf {
        self.state_dir.join(&config.agents_dir)
    }

    /// Directory holding a feature's checkpoint.
    pub fn feature_state_dir(&self, feature: &str) -> PathBuf {
        self.features_dir.join(feature)
    }

    pub fn feature_lock_path(&self, feature: &str) -> PathBuf {
        self.locks_dir.join(format!("{}.lock", feature))
    }

    /// Directory receiving a feature's generated artifacts.
    pub fn feature_specs_dir(&self, config: &Config, feature: &str) -> PathBuf {
        self.root.join(&config.specs_dir).join(feature)
    }

    /// Determine the active feature.
    ///
    /// An explicit id wins; otherwise the current branch must look like
    /// `NNN-short-name`.
    pub fn detect_feature(&self, explicit: Option<&str>) -> Result<String> {
        if let Some(id) = explicit {
            validate_feature_id(id)?;
            return Ok(id.to_string());
        }

        match git::current_branch(&self.root) {
            Some(branch) if parse_feature_branch(&branch).is_some() => Ok(branch),
            Some(branch) => Err(SpecrunError::UserError(format!(
                "branch '{}' does not name a feature (expected NNN-short-name, e.g. 001-user-auth).\n\
                 Check out a feature branch or pass --feature <id>.",
                branch
            ))),
            None => Err(SpecrunError::UserError(
                "could not determine the active feature: no git branch.\n\
                 Pass --feature <id>."
                    .to_string(),
            )),
        }
    }
}

/// Split a feature branch into its number and short name.
pub fn parse_feature_branch(branch: &str) -> Option<(&str, &str)> {
    let caps = FEATURE_BRANCH.captures(branch)?;
    Some((caps.get(1)?.as_str(), caps.get(2)?.as_str()))
}

/// Feature ids become path components, so they are restricted to a safe charset.
pub fn validate_feature_id(id: &str) -> Result<()> {
    if FEATURE_ID.is_match(id) && !id.contains("..") {
        Ok(())
    } else {
        Err(SpecrunError::UserError(format!(
            "invalid feature id '{}': use letters, digits, '.', '_' or '-'",
            id
        )))
    }
}
