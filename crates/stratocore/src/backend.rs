use crate::{BackendError, Flow, FlowId, FlowState, Task, TaskId, TaskState};
use async_trait::async_trait;

/// Store contract the engine schedules against.
///
/// The backend is the single source of truth for durable state; everything
/// the engine holds in memory is a cache scoped to one flow run and is
/// rebuilt from here after a restart.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Atomically select one `Pending` flow and mark it `Running`.
    ///
    /// At most one caller may win a given flow, across worker tasks in one
    /// process and across replicas. Implementations should also hand back
    /// `Running` flows whose owner has been silent past a liveness window,
    /// which is all the crash recovery the engine needs.
    ///
    /// Returns `Ok(None)` when nothing is claimable; that is a normal idle
    /// poll, not an error.
    async fn consume_one_pending_flow(&self) -> Result<Option<Flow>, BackendError>;

    async fn tasks_by_flow(&self, flow_id: FlowId) -> Result<Vec<Task>, BackendError>;

    async fn flow_by_id(&self, flow_id: FlowId) -> Result<Flow, BackendError>;

    async fn set_flow_state(
        &self,
        flow_id: FlowId,
        state: FlowState,
        reason: &str,
    ) -> Result<(), BackendError>;

    async fn set_task_state(
        &self,
        task_id: TaskId,
        state: TaskState,
        reason: &str,
    ) -> Result<(), BackendError>;
}
