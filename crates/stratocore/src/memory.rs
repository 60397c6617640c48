use crate::{Backend, BackendError, Flow, FlowId, FlowState, Task, TaskId, TaskSpec, TaskState};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const DEFAULT_LIVENESS: Duration = Duration::from_secs(300);

/// In-memory [`Backend`] used by tests and single-process embedders.
///
/// Every operation runs under one short-lived lock, which is what makes the
/// claim atomic: a flow observed `Pending` is marked `Running` before the
/// lock is released, so concurrent claimers can never both win it. A flow
/// that stays `Running` past the liveness window with no progress is handed
/// out again on a later claim.
pub struct MemoryBackend {
    inner: Mutex<Inner>,
    liveness: Duration,
}

#[derive(Default)]
struct Inner {
    next_flow_id: FlowId,
    next_task_id: TaskId,
    flows: HashMap<FlowId, Flow>,
    tasks: HashMap<TaskId, Task>,
    flow_tasks: HashMap<FlowId, Vec<TaskId>>,
    claims: HashMap<FlowId, Instant>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_liveness(DEFAULT_LIVENESS)
    }

    pub fn with_liveness(liveness: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            liveness,
        }
    }

    /// Enqueue a new flow built from `specs`, returning its assigned id.
    ///
    /// `depend_on` entries are positions into `specs` and are rewritten to
    /// the task ids assigned here. The whole batch is inserted under one
    /// lock, so a claimer never observes a half-created flow.
    pub fn submit_flow(&self, specs: Vec<TaskSpec>) -> Result<FlowId, BackendError> {
        if specs.is_empty() {
            return Err(BackendError::InvalidSpec("flow has no tasks".into()));
        }
        for (pos, spec) in specs.iter().enumerate() {
            if spec.action_name.is_empty() {
                return Err(BackendError::InvalidSpec(format!(
                    "task at position {} has an empty action name",
                    pos
                )));
            }
            if spec.timeout_secs == 0 {
                return Err(BackendError::InvalidSpec(format!(
                    "task at position {} has a zero timeout",
                    pos
                )));
            }
            for &dep in &spec.depend_on {
                if dep >= specs.len() || dep == pos {
                    return Err(BackendError::InvalidSpec(format!(
                        "task at position {} depends on invalid position {}",
                        pos, dep
                    )));
                }
            }
        }

        let mut inner = self.lock();
        inner.next_flow_id += 1;
        let flow_id = inner.next_flow_id;

        let base_task_id = inner.next_task_id;
        let now = Utc::now();
        let mut task_ids = Vec::with_capacity(specs.len());
        for (pos, spec) in specs.into_iter().enumerate() {
            let id = base_task_id + 1 + pos as TaskId;
            let task = Task {
                id,
                flow_id,
                action_name: spec.action_name,
                params: spec.params,
                depend_on: spec
                    .depend_on
                    .into_iter()
                    .map(|p| base_task_id + 1 + p as TaskId)
                    .collect(),
                retry_count: spec.retry_count,
                timeout_secs: spec.timeout_secs,
                state: TaskState::Pending,
                reason: String::new(),
                created_at: now,
                updated_at: now,
            };
            inner.tasks.insert(id, task);
            task_ids.push(id);
        }
        inner.next_task_id = base_task_id + task_ids.len() as TaskId;
        inner.flow_tasks.insert(flow_id, task_ids);
        inner.flows.insert(flow_id, Flow::new(flow_id));

        debug!(flow_id, "flow submitted");
        Ok(flow_id)
    }

    /// Current copy of a flow, for inspection outside the `Backend` trait
    pub fn flow(&self, flow_id: FlowId) -> Option<Flow> {
        self.lock().flows.get(&flow_id).cloned()
    }

    /// Current copy of a task, for inspection outside the `Backend` trait
    pub fn task(&self, task_id: TaskId) -> Option<Task> {
        self.lock().tasks.get(&task_id).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn consume_one_pending_flow(&self) -> Result<Option<Flow>, BackendError> {
        let mut inner = self.lock();
        let mut ids: Vec<FlowId> = inner.flows.keys().copied().collect();
        ids.sort_unstable();

        let pending = ids
            .iter()
            .copied()
            .find(|id| inner.flows[id].state == FlowState::Pending);
        if let Some(id) = pending {
            inner.claims.insert(id, Instant::now());
            if let Some(flow) = inner.flows.get_mut(&id) {
                flow.state = FlowState::Running;
                flow.updated_at = Utc::now();
                debug!(flow_id = id, "flow claimed");
                return Ok(Some(flow.clone()));
            }
        }

        // Nothing pending: look for a Running flow whose owner went silent.
        let abandoned = ids.iter().copied().find(|id| {
            inner.flows[id].state == FlowState::Running
                && match inner.claims.get(id) {
                    Some(claimed_at) => claimed_at.elapsed() >= self.liveness,
                    None => true,
                }
        });
        if let Some(id) = abandoned {
            inner.claims.insert(id, Instant::now());
            warn!(flow_id = id, "re-claiming abandoned running flow");
            return Ok(Some(inner.flows[&id].clone()));
        }

        Ok(None)
    }

    async fn tasks_by_flow(&self, flow_id: FlowId) -> Result<Vec<Task>, BackendError> {
        let inner = self.lock();
        let ids = inner
            .flow_tasks
            .get(&flow_id)
            .ok_or(BackendError::FlowNotFound(flow_id))?;
        Ok(ids
            .iter()
            .filter_map(|id| inner.tasks.get(id).cloned())
            .collect())
    }

    async fn flow_by_id(&self, flow_id: FlowId) -> Result<Flow, BackendError> {
        self.lock()
            .flows
            .get(&flow_id)
            .cloned()
            .ok_or(BackendError::FlowNotFound(flow_id))
    }

    async fn set_flow_state(
        &self,
        flow_id: FlowId,
        state: FlowState,
        reason: &str,
    ) -> Result<(), BackendError> {
        let mut inner = self.lock();
        let flow = inner
            .flows
            .get_mut(&flow_id)
            .ok_or(BackendError::FlowNotFound(flow_id))?;
        flow.state = state;
        flow.reason = reason.to_string();
        flow.updated_at = Utc::now();
        if state.is_terminal() {
            inner.claims.remove(&flow_id);
        }
        Ok(())
    }

    async fn set_task_state(
        &self,
        task_id: TaskId,
        state: TaskState,
        reason: &str,
    ) -> Result<(), BackendError> {
        let mut inner = self.lock();
        let task = inner
            .tasks
            .get_mut(&task_id)
            .ok_or(BackendError::TaskNotFound(task_id))?;
        task.state = state;
        task.reason = reason.to_string();
        task.updated_at = Utc::now();
        Ok(())
    }
}
