//! Orchestration: delegated calls with retry and fallback, scheduled across a
//! dependency graph of work items.

mod coordinator;
mod graph;
mod scheduler;

pub use coordinator::{
    AllAgentsExhausted, CandidateFailure, ExecutionCoordinator, ExecutionOutcome, FallbackMachine,
    FallbackState, RetryPolicy,
};
pub use graph::topological_order;
pub use scheduler::{
    BatchReport, ItemFailure, ItemOutcome, ItemStatus, Scheduler, SchedulerOptions, WorkItem,
};
