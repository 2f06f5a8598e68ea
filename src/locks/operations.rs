//! Lock acquisition, listing and clearing.

use super::guard::LockGuard;
use super::metadata::LockMetadata;
use crate::context::WorkspaceContext;
use crate::error::{Result, SpecrunError};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// An existing lock file.
#[derive(Debug, Clone)]
pub struct LockInfo {
    pub path: PathBuf,
    /// File stem; the feature id for feature locks.
    pub name: String,
    pub metadata: LockMetadata,
    pub is_stale: bool,
}

impl fmt::Display for LockInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (owner: {}, pid: {}, age: {}, action: {}{})",
            self.name,
            self.metadata.owner,
            self.metadata
                .pid
                .map(|p| p.to_string())
                .unwrap_or_else(|| "?".to_string()),
            self.metadata.age_string(),
            self.metadata.action,
            if self.is_stale { ", STALE" } else { "" }
        )
    }
}

/// Create `lock_path` exclusively and write `action` metadata into it.
///
/// Fails with `LockContention` (exit code 4) when the file already exists.
pub fn acquire_lock(lock_path: &Path, action: &str) -> Result<LockGuard> {
    if let Some(parent) = lock_path.parent()
        && !parent.exists()
    {
        fs::create_dir_all(parent).map_err(|e| {
            SpecrunError::LockContention(format!(
                "failed to create locks directory '{}': {}",
                parent.display(),
                e
            ))
        })?;
    }

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(lock_path)
        .map_err(|e| {
            if e.kind() != std::io::ErrorKind::AlreadyExists {
                return SpecrunError::LockContention(format!(
                    "failed to acquire lock '{}': {}",
                    lock_path.display(),
                    e
                ));
            }
            let holder = match LockMetadata::from_file(lock_path) {
                Ok(meta) => format!(
                    "\nLock: {} (created {} ago by {})\nAction: {}",
                    lock_path.display(),
                    meta.age_string(),
                    meta.owner,
                    meta.action
                ),
                Err(_) => format!("\nLock: {}", lock_path.display()),
            };
            SpecrunError::LockContention(format!("lock is held by another process{}", holder))
        })?;

    let metadata = LockMetadata::new(action);
    let written = metadata
        .to_json()
        .and_then(|json| {
            file.write_all(json.as_bytes())
                .and_then(|_| file.sync_all())
                .map_err(|e| {
                    SpecrunError::LockContention(format!("failed to write lock metadata: {}", e))
                })
        });
    if let Err(e) = written {
        let _ = fs::remove_file(lock_path);
        return Err(e);
    }

    tracing::debug!(lock = %lock_path.display(), action, "acquired lock");
    Ok(LockGuard::new(lock_path.to_path_buf()))
}

/// Lock serializing all mutations of `feature`'s workflow state.
pub fn acquire_feature_lock(
    ctx: &WorkspaceContext,
    feature: &str,
    action: &str,
) -> Result<LockGuard> {
    acquire_lock(&ctx.feature_lock_path(feature), action)
}

/// All lock files, sorted by name. Unreadable lock files are skipped.
pub fn list_locks(ctx: &WorkspaceContext, stale_minutes: u32) -> Result<Vec<LockInfo>> {
    if !ctx.locks_dir.exists() {
        return Ok(Vec::new());
    }

    let entries = fs::read_dir(&ctx.locks_dir).map_err(|e| {
        SpecrunError::UserError(format!(
            "failed to read locks directory '{}': {}",
            ctx.locks_dir.display(),
            e
        ))
    })?;

    let mut locks = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|e| {
                SpecrunError::UserError(format!("failed to read locks directory entry: {}", e))
            })?
            .path();

        if path.extension().and_then(|e| e.to_str()) != Some("lock") {
            continue;
        }
        let Ok(metadata) = LockMetadata::from_file(&path) else {
            tracing::warn!(lock = %path.display(), "skipping unreadable lock file");
            continue;
        };
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        let is_stale = metadata.is_stale(stale_minutes);
        locks.push(LockInfo {
            path,
            name,
            metadata,
            is_stale,
        });
    }

    locks.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(locks)
}

/// Remove the lock named `name`, returning what it held.
///
/// The caller decides whether clearing is appropriate (stale, or `--force`).
pub fn clear_lock(ctx: &WorkspaceContext, name: &str, stale_minutes: u32) -> Result<LockInfo> {
    let path = ctx.feature_lock_path(name);
    if !path.exists() {
        return Err(SpecrunError::UserError(format!(
            "lock '{}' does not exist at: {}",
            name,
            path.display()
        )));
    }

    let metadata = LockMetadata::from_file(&path)?;
    let is_stale = metadata.is_stale(stale_minutes);

    fs::remove_file(&path).map_err(|e| {
        SpecrunError::UserError(format!("failed to clear lock '{}': {}", path.display(), e))
    })?;
    tracing::info!(lock = %path.display(), "cleared lock");

    Ok(LockInfo {
        path,
        name: name.to_string(),
        metadata,
        is_stale,
    })
}
