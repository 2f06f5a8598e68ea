//! Error types for specrun.
//!
//! Uses thiserror for derive macros. Call-level failures reported by the agent
//! primitive live in [`crate::agent::dispatch::CallError`]; this enum covers
//! everything that can abort an operation.

use crate::exit_codes;
use crate::orchestrate::AllAgentsExhausted;
use thiserror::Error;

/// Main error type for specrun operations.
#[derive(Error, Debug)]
pub enum SpecrunError {
    /// User provided invalid arguments or the system is in an invalid state.
    #[error("{0}")]
    UserError(String),

    /// Configuration or agent catalog failed to load or validate.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// An agent name was not found in the registry.
    #[error("unknown agent '{0}'")]
    UnknownAgent(String),

    /// Attempted to disable the fallback agent.
    #[error("agent '{0}' is the fallback agent and cannot be disabled")]
    ProtectedAgent(String),

    /// The submitted work items form a dependency cycle.
    #[error("dependency cycle between work items: {}", .0.join(", "))]
    CyclicDependency(Vec<String>),

    /// The submitted batch is malformed (duplicate ids, unknown dependencies).
    #[error("invalid batch: {0}")]
    InvalidBatch(String),

    /// Every candidate agent failed for a single delegated call.
    #[error(transparent)]
    AllAgentsExhausted(#[from] AllAgentsExhausted),

    /// One or more items of a batch failed; the message is the rendered summary.
    #[error("{0}")]
    ItemsFailed(String),

    /// Reading or writing workflow state failed.
    #[error("State error: {0}")]
    StateError(String),

    /// The workflow lock is held by another process.
    #[error("Lock acquisition failed: {0}")]
    LockContention(String),

    /// Git operation failed.
    #[error("Git operation failed: {0}")]
    GitError(String),
}

impl SpecrunError {
    /// Returns the appropriate exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            SpecrunError::UserError(_)
            | SpecrunError::ConfigError(_)
            | SpecrunError::UnknownAgent(_)
            | SpecrunError::ProtectedAgent(_)
            | SpecrunError::StateError(_) => exit_codes::USER_ERROR,
            SpecrunError::AllAgentsExhausted(_) | SpecrunError::ItemsFailed(_) => {
                exit_codes::AGENT_FAILURE
            }
            SpecrunError::CyclicDependency(_) | SpecrunError::InvalidBatch(_) => {
                exit_codes::GRAPH_REJECTED
            }
            SpecrunError::LockContention(_) => exit_codes::LOCK_FAILURE,
            SpecrunError::GitError(_) => exit_codes::GIT_FAILURE,
        }
    }
}

/// Result type alias for specrun operations.
pub type Result<T> = std::result::Result<T, SpecrunError>;
