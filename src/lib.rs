//! specrun: resumable spec-driven workflow runner.
//!
//! A workflow request ("specify", "plan", ...) is matched to agent profiles by
//! capability, executed with bounded retry and fallback, scheduled across a
//! dependency graph, and recorded in a checkpointed per-feature state machine.

pub mod agent;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod exit_codes;
pub mod fs;
pub mod git;
pub mod locks;
pub mod orchestrate;
pub mod session;
pub mod workflow;

#[cfg(test)]
pub(crate) mod test_support;
