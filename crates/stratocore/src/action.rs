use crate::{ActionError, FlowId, TaskId};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Execution context handed to every lifecycle hook
#[derive(Clone)]
pub struct ActionContext {
    pub flow_id: FlowId,
    pub task_id: TaskId,

    /// Opaque task payload; interpretation is entirely up to the action
    pub params: serde_json::Value,

    /// Cancelled when the task is aborted externally. Hooks doing long work
    /// should observe it and bail out.
    pub cancellation: CancellationToken,
}

/// Core trait all executable actions implement.
///
/// The five hooks mirror the task lifecycle: `run_before` fires while the
/// task is `Pending`, `run` carries the main body, `run_before_success`
/// fires on the way into `Success`, `run_before_failed` once the retry
/// budget is gone, and `retry_before` ahead of each re-dispatch. Only `run`
/// is mandatory; the rest default to no-ops.
///
/// Hooks must be idempotent: the engine guarantees at-least-once invocation,
/// not exactly-once.
#[async_trait]
pub trait Action: Send + Sync {
    /// Unique registry key (e.g. "compute.create_instance")
    fn name(&self) -> &str;

    async fn run_before(&self, _ctx: &ActionContext) -> Result<(), ActionError> {
        Ok(())
    }

    async fn run(&self, ctx: &ActionContext) -> Result<(), ActionError>;

    async fn run_before_success(&self, _ctx: &ActionContext) -> Result<(), ActionError> {
        Ok(())
    }

    async fn run_before_failed(&self, _ctx: &ActionContext) -> Result<(), ActionError> {
        Ok(())
    }

    async fn retry_before(&self, _ctx: &ActionContext) -> Result<(), ActionError> {
        Ok(())
    }
}
