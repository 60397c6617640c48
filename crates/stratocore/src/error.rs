use crate::{FlowId, FlowState, TaskId, TaskState};
use thiserror::Error;

/// Top-level error for engine operations
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("action error: {0}")]
    Action(#[from] ActionError),

    #[error("state error: {0}")]
    State(#[from] StateError),

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("execution error: {0}")]
    Execution(String),
}

/// Structural defects in a flow's dependency graph. These are fatal to the
/// flow and never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("cycle detected in flow {0}")]
    CycleDetected(FlowId),

    #[error("task {task_id} depends on unknown task {depend_on}")]
    MissingDependency { task_id: TaskId, depend_on: TaskId },

    #[error("task {0} is not part of this graph")]
    UnknownTask(TaskId),

    #[error("flow {0} has no tasks")]
    EmptyFlow(FlowId),
}

/// Errors surfaced by action hooks, or by the engine on their behalf
#[derive(Error, Debug, Clone)]
pub enum ActionError {
    #[error("no action registered under '{0}'")]
    Unregistered(String),

    #[error("execution failed: {0}")]
    Failed(String),

    #[error("timeout after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("cancelled")]
    Cancelled,
}

/// Rejected state-machine transitions, caught before anything is persisted
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("flow {id}: illegal transition {from} -> {to}")]
    InvalidFlowTransition {
        id: FlowId,
        from: FlowState,
        to: FlowState,
    },

    #[error("task {id}: illegal transition {from} -> {to}")]
    InvalidTaskTransition {
        id: TaskId,
        from: TaskState,
        to: TaskState,
    },
}

/// Errors from the persistent store
#[derive(Error, Debug, Clone)]
pub enum BackendError {
    #[error("flow not found: {0}")]
    FlowNotFound(FlowId),

    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("invalid task spec: {0}")]
    InvalidSpec(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}
