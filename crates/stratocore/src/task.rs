use crate::FlowId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type TaskId = u64;

/// One node of work inside a flow.
///
/// A task names the action that executes it, carries an opaque payload for
/// that action, and lists the sibling tasks that must succeed before it may
/// run. Tasks are created together with their flow and are never deleted;
/// terminal state is retained for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub flow_id: FlowId,
    /// Registry key resolved to an implementation at execution time
    pub action_name: String,
    /// Opaque payload handed to the action; the engine never interprets it
    pub params: serde_json::Value,
    /// Same-flow task ids that must reach `Success` before this task runs
    pub depend_on: Vec<TaskId>,
    /// Remaining retry budget; zero means no further retries
    pub retry_count: u32,
    /// Wall-clock budget for one execution attempt, always > 0
    pub timeout_secs: u64,
    pub state: TaskState,
    /// Last failure detail; empty while no error has been recorded
    pub reason: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Task lifecycle states. Each non-terminal state maps to the lifecycle hook
/// that runs on entry; see the executor for the drive sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    Pending,
    Running,
    BeforeSuccess,
    Success,
    BeforeFailed,
    Failed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Success | TaskState::Failed)
    }

    /// Whether moving from this state to `next` is a legal transition.
    ///
    /// Besides the happy path and the failure path, any live state may be
    /// reset to `Pending`: retries re-enter the dispatch state, and tasks
    /// abandoned by a crashed owner are re-queued the same way.
    pub fn can_transition(&self, next: TaskState) -> bool {
        use TaskState::*;
        match (self, next) {
            (Pending, Running) => true,
            (Running, BeforeSuccess) => true,
            (BeforeSuccess, Success) => true,
            (Pending | Running | BeforeSuccess, BeforeFailed) => true,
            (BeforeFailed, Failed) => true,
            (Pending | Running | BeforeSuccess | BeforeFailed, Pending) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TaskState::Pending => "Pending",
            TaskState::Running => "Running",
            TaskState::BeforeSuccess => "BeforeSuccess",
            TaskState::Success => "Success",
            TaskState::BeforeFailed => "BeforeFailed",
            TaskState::Failed => "Failed",
        };
        write!(f, "{}", name)
    }
}

/// Enqueue-side description of one task in a new flow.
///
/// `depend_on` entries are positions into the submitted batch; the store
/// rewrites them to the task ids it assigns on insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub action_name: String,
    pub params: serde_json::Value,
    pub depend_on: Vec<usize>,
    pub retry_count: u32,
    pub timeout_secs: u64,
}

impl TaskSpec {
    pub fn new(action_name: impl Into<String>) -> Self {
        Self {
            action_name: action_name.into(),
            params: serde_json::Value::Null,
            depend_on: Vec::new(),
            retry_count: 0,
            timeout_secs: 60,
        }
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }

    pub fn with_depend_on(mut self, positions: Vec<usize>) -> Self {
        self.depend_on = positions;
        self
    }

    pub fn with_retries(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }
}
