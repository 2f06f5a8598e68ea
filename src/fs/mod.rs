//! Filesystem utilities.
//!
//! Checkpoints and generated artifacts are written atomically so a crash
//! never leaves a half-written file behind.

pub mod atomic;

pub use atomic::{atomic_write, atomic_write_json};
