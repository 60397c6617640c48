use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type FlowId = u64;

/// One requested unit of work, executed as a DAG of tasks.
///
/// Flows are created `Pending` by an external enqueuer, claimed to `Running`
/// by exactly one scheduler instance, and end in `Success` or `Failed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    pub id: FlowId,
    pub state: FlowState,
    /// Last failure detail; empty while no error has been recorded
    pub reason: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Flow {
    pub fn new(id: FlowId) -> Self {
        let now = Utc::now();
        Self {
            id,
            state: FlowState::Pending,
            reason: String::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Flow lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlowState {
    Pending,
    Running,
    Success,
    Failed,
}

impl FlowState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, FlowState::Success | FlowState::Failed)
    }

    /// Whether moving from this state to `next` is a legal transition.
    ///
    /// `Pending` is the only creation state, `Running` is entered exactly
    /// once by a successful claim, and terminal states are final.
    pub fn can_transition(&self, next: FlowState) -> bool {
        matches!(
            (self, next),
            (FlowState::Pending, FlowState::Running)
                | (FlowState::Running, FlowState::Success)
                | (FlowState::Running, FlowState::Failed)
        )
    }
}

impl std::fmt::Display for FlowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FlowState::Pending => "Pending",
            FlowState::Running => "Running",
            FlowState::Success => "Success",
            FlowState::Failed => "Failed",
        };
        write!(f, "{}", name)
    }
}
