//! Bounded-retry wrappers around backend state writes.
//!
//! Transient store failures are retried a fixed number of times with
//! increasing backoff; exhaustion returns the last error and leaves the
//! entity in its last persisted state for the next scheduling pass to
//! reconcile.

use std::time::Duration;
use stratocore::{Backend, BackendError, FlowId, FlowState, TaskId, TaskState};
use tokio::time::sleep;
use tracing::warn;

#[derive(Debug, Clone, Copy)]
pub(crate) struct StoreRetry {
    pub attempts: u32,
    pub base_delay: Duration,
}

pub(crate) async fn set_flow_state(
    backend: &dyn Backend,
    retry: StoreRetry,
    flow_id: FlowId,
    state: FlowState,
    reason: &str,
) -> Result<(), BackendError> {
    let mut last = None;
    for attempt in 0..retry.attempts.max(1) {
        if attempt > 0 {
            sleep(retry.base_delay * attempt).await;
        }
        match backend.set_flow_state(flow_id, state, reason).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                warn!(flow_id, attempt, error = %e, "flow state write failed");
                last = Some(e);
            }
        }
    }
    Err(last.unwrap_or_else(|| BackendError::Unavailable("flow state write failed".into())))
}

pub(crate) async fn set_task_state(
    backend: &dyn Backend,
    retry: StoreRetry,
    task_id: TaskId,
    state: TaskState,
    reason: &str,
) -> Result<(), BackendError> {
    let mut last = None;
    for attempt in 0..retry.attempts.max(1) {
        if attempt > 0 {
            sleep(retry.base_delay * attempt).await;
        }
        match backend.set_task_state(task_id, state, reason).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                warn!(task_id, attempt, error = %e, "task state write failed");
                last = Some(e);
            }
        }
    }
    Err(last.unwrap_or_else(|| BackendError::Unavailable("task state write failed".into())))
}
