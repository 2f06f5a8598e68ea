//! RAII lock guard.

use crate::error::{Result, SpecrunError};
use std::fs;
use std::path::{Path, PathBuf};

/// Holds a lock file; the file is removed on drop.
///
/// A failed removal during drop is logged, never a panic.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    released: bool,
}

impl LockGuard {
    pub(super) fn new(path: PathBuf) -> Self {
        Self {
            path,
            released: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release now and surface any removal error.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        tracing::debug!(lock = %self.path.display(), "releasing lock");
        fs::remove_file(&self.path).map_err(|e| {
            SpecrunError::LockContention(format!(
                "failed to release lock '{}': {}",
                self.path.display(),
                e
            ))
        })
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(lock = %self.path.display(), "released lock"),
            Err(e) => tracing::warn!(lock = %self.path.display(), "failed to release lock: {}", e),
        }
    }
}
