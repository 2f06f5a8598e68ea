//! Workflow phases, commands and the durable per-feature state machine.

mod command;
mod machine;
mod phase;
mod state;
mod store;

pub use command::CommandKind;
pub use machine::{AGENTS_CONTEXT_KEY, WorkflowMachine};
pub use phase::Phase;
pub use state::{
    CompletionRecord, ReentryRecord, STATE_SCHEMA_VERSION, Transition, WorkflowState,
};
pub use store::{CORRUPT_FILE, FileStateStore, LoadWarning, LoadedState, STATE_FILE, StateStore};
