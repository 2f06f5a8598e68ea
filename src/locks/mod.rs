//! Advisory lock files.
//!
//! One lock per feature (`.specrun/locks/<feature>.lock`) serializes every
//! mutation of that feature's workflow state and the session's agent
//! enable/disable operations. Locks are created with create-new semantics, so
//! only one process can hold a given lock.
//!
//! Each lock file holds JSON metadata: owner (`user@host`), pid, creation
//! time and the action being performed. [`LockGuard`] deletes the file when
//! dropped.

mod guard;
mod metadata;
mod operations;

#[cfg(test)]
mod tests;

pub use guard::LockGuard;
pub use metadata::LockMetadata;
pub(crate) use metadata::owner_string;
pub use operations::{LockInfo, acquire_feature_lock, acquire_lock, clear_lock, list_locks};
