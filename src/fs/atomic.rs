//! Atomic file writes.
//!
//! Every write follows the same sequence:
//! 1. write the content to `.{filename}.tmp` next to the target
//! 2. fsync the temporary file
//! 3. rename it over the target
//! 4. fsync the parent directory (unix) so the new entry is durable
//!
//! Source and destination share a directory, so the rename never crosses
//! filesystems. After a crash a stale `.{filename}.tmp` may remain; the next
//! write truncates it.

use crate::error::{Result, SpecrunError};
use serde::Serialize;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Atomically replace `path` with `content`, creating parent directories.
pub fn atomic_write<P: AsRef<Path>>(path: P, content: &[u8]) -> Result<()> {
    let path = path.as_ref();

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        fs::create_dir_all(parent).map_err(|e| {
            SpecrunError::StateError(format!(
                "failed to create directory '{}': {}",
                parent.display(),
                e
            ))
        })?;
    }

    let temp_path = temp_path_for(path)?;
    write_and_sync(&temp_path, content)?;

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        SpecrunError::StateError(format!(
            "failed to atomically replace '{}': {}",
            path.display(),
            e
        ))
    })?;

    sync_parent(path);
    Ok(())
}

/// Serialize `value` as pretty JSON (with a trailing newline) and write it atomically.
pub fn atomic_write_json<P: AsRef<Path>, T: Serialize>(path: P, value: &T) -> Result<()> {
    let mut json = serde_json::to_string_pretty(value).map_err(|e| {
        SpecrunError::StateError(format!(
            "failed to serialize '{}': {}",
            path.as_ref().display(),
            e
        ))
    })?;
    json.push('\n');
    atomic_write(path, json.as_bytes())
}

fn temp_path_for(target: &Path) -> Result<PathBuf> {
    let filename = target
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            SpecrunError::StateError(format!("invalid file path '{}'", target.display()))
        })?;
    let parent = target.parent().unwrap_or(Path::new("."));
    Ok(parent.join(format!(".{}.tmp", filename)))
}

fn write_and_sync(path: &Path, content: &[u8]) -> Result<()> {
    let mut file = File::create(path).map_err(|e| {
        SpecrunError::StateError(format!(
            "failed to create temporary file '{}': {}",
            path.display(),
            e
        ))
    })?;

    let written = file.write_all(content).and_then(|_| file.sync_all());
    written.map_err(|e| {
        let _ = fs::remove_file(path);
        SpecrunError::StateError(format!(
            "failed to write temporary file '{}': {}",
            path.display(),
            e
        ))
    })
}

#[cfg(unix)]
fn sync_parent(path: &Path) {
    if let Some(parent) = path.parent()
        && let Ok(dir) = File::open(parent)
    {
        let _ = dir.sync_all();
    }
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) {}
