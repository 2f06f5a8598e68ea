//! Agents: who can do the work, and how a call to one is made.
//!
//! - **Capability**: the closed set of capability tags
//! - **Config**: the agent catalog (`agents.yaml` or a directory of `*.md` files)
//! - **Registry**: session-scoped profiles plus capability selection
//! - **Prompt**: per-command prompt templates
//! - **Dispatch**: the delegated-call primitive and its subprocess implementation

mod capability;
mod config;
pub mod dispatch;
pub mod prompt;
mod registry;

pub use capability::{Capability, parse_capability_list};
pub use config::{AgentDefaults, AgentProfile, AgentsConfig, GENERIC_ROLE};
pub use dispatch::{AgentCall, CallError, CommandAgentCall, Payload, TransientKind, Upstream};
pub use registry::CapabilityRegistry;
