//! Exit code constants for the specrun CLI.
//!
//! - 0: Success
//! - 1: User or configuration error (bad args, unknown agent, invalid config)
//! - 2: Agent execution failure (at least one work item failed)
//! - 3: Git operation failure
//! - 4: Lock contention on the workflow state
//! - 5: Work item graph rejected (cycle, duplicate or unknown ids)

/// Successful execution.
pub const SUCCESS: i32 = 0;

/// User error: bad arguments, unknown or protected agent, invalid configuration.
pub const USER_ERROR: i32 = 1;

/// One or more work items failed after all candidate agents were tried.
pub const AGENT_FAILURE: i32 = 2;

/// Git operation failure while resolving the workspace or feature branch.
pub const GIT_FAILURE: i32 = 3;

/// The feature's workflow lock is held by another process.
pub const LOCK_FAILURE: i32 = 4;

/// The submitted batch was rejected before anything executed.
pub const GRAPH_REJECTED: i32 = 5;
