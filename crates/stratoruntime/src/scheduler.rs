use crate::graph::TaskGraph;
use crate::store::{self, StoreRetry};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use stratocore::{Backend, Flow, FlowId, FlowState, StateError, Task, TaskState};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Claim-and-plan half of the engine.
///
/// One watcher loop polls the backend for a pending flow, claims it, builds
/// its task graph, and feeds the initially-executable nodes to the executor.
/// Worker completion callbacks re-enter through [`Scheduler::on_task_done`]
/// to decide what becomes executable next; when nothing does and the graph
/// resolves to a terminal status, the flow is finalized and the graph
/// discarded.
pub struct Scheduler {
    backend: Arc<dyn Backend>,
    dispatch_tx: mpsc::Sender<Task>,
    /// Live graphs keyed by flow id. Completion callbacks for sibling tasks
    /// of one flow arrive concurrently from different workers, so each graph
    /// sits behind its own lock, held only across record/append.
    graphs: RwLock<HashMap<FlowId, Arc<Mutex<TaskGraph>>>>,
    retry: StoreRetry,
}

impl Scheduler {
    pub(crate) fn new(
        backend: Arc<dyn Backend>,
        dispatch_tx: mpsc::Sender<Task>,
        retry: StoreRetry,
    ) -> Self {
        Self {
            backend,
            dispatch_tx,
            graphs: RwLock::new(HashMap::new()),
            retry,
        }
    }

    /// Watcher loop: poll the backend on a fixed interval until shutdown.
    pub async fn run(self: Arc<Self>, poll_interval: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("scheduler loop stopping");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_pending_flow().await {
                        warn!(error = %e, "poll cycle failed");
                    }
                }
            }
        }
    }

    /// One poll cycle: claim at most one pending flow and plan it.
    ///
    /// The claim is the engine's central correctness contract: the backend
    /// marks the flow `Running` atomically, so no sibling replica can win
    /// the same flow. "Nothing pending" is a no-op.
    pub async fn poll_pending_flow(&self) -> stratocore::Result<()> {
        let Some(flow) = self.backend.consume_one_pending_flow().await? else {
            return Ok(());
        };
        self.plan_flow(flow).await
    }

    async fn plan_flow(&self, flow: Flow) -> stratocore::Result<()> {
        let run_id = Uuid::new_v4();

        if self.graphs.read().await.contains_key(&flow.id) {
            // An earlier run of this flow is still live in this process; the
            // backend handed it out again too eagerly.
            warn!(flow_id = flow.id, "claimed flow already has a live graph; skipping");
            return Ok(());
        }

        let tasks = self.backend.tasks_by_flow(flow.id).await?;
        let mut graph = match TaskGraph::build(flow.id, run_id, tasks) {
            Ok(graph) => graph,
            Err(e) => {
                error!(flow_id = flow.id, error = %e, "task graph rejected");
                self.set_flow_state(flow.id, FlowState::Failed, &e.to_string())
                    .await?;
                return Ok(());
            }
        };

        // Tasks a dead owner left mid-flight run again from the top.
        for task_id in graph.reset_interrupted() {
            store::set_task_state(
                self.backend.as_ref(),
                self.retry,
                task_id,
                TaskState::Pending,
                "re-queued after abandoned run",
            )
            .await?;
        }

        let executable = graph.executable_nodes();
        info!(
            flow_id = flow.id,
            %run_id,
            tasks = graph.len(),
            executable = executable.len(),
            "claimed flow"
        );

        if executable.is_empty() {
            let status = graph.status();
            if status.is_terminal() {
                // Re-claimed flow whose work had already finished.
                self.set_flow_state(flow.id, status, &graph.reason).await?;
            } else {
                self.set_flow_state(flow.id, FlowState::Failed, "no runnable tasks")
                    .await?;
            }
            return Ok(());
        }

        graph.mark_in_flight(executable.iter().map(|t| t.id));
        self.graphs
            .write()
            .await
            .insert(flow.id, Arc::new(Mutex::new(graph)));

        for task in executable {
            self.dispatch(task).await;
        }
        Ok(())
    }

    /// Completion callback invoked by executor workers after a node finishes,
    /// successfully or not.
    pub async fn on_task_done(&self, task: Task) {
        let flow_id = task.flow_id;
        let task_id = task.id;

        let graph = self.graphs.read().await.get(&flow_id).cloned();
        let Some(graph) = graph else {
            // The flow was already finalized by whichever path removed the
            // graph; nothing left to drive.
            warn!(flow_id, task_id, "orphaned completion callback; dropping");
            return;
        };

        if !task.state.is_terminal() {
            // A worker gave up mid-drive because state writes kept failing.
            // Drop the cache and let the backend's liveness reclaim re-run
            // the flow against durable state.
            warn!(
                flow_id,
                task_id,
                state = %task.state,
                "task handed back unfinished; discarding graph"
            );
            self.graphs.write().await.remove(&flow_id);
            return;
        }

        let mut next = Vec::new();
        let mut terminal = None;
        {
            let mut graph = graph.lock().await;
            if let Err(e) = graph.record_result(task) {
                error!(flow_id, task_id, error = %e, "completion for unknown node");
                return;
            }
            match graph.unblocked_after(task_id) {
                Ok(nodes) if !nodes.is_empty() => {
                    graph.mark_in_flight(nodes.iter().map(|t| t.id));
                    next = nodes;
                }
                Ok(_) => {
                    let status = graph.status();
                    if status.is_terminal() {
                        terminal = Some((status, graph.reason.clone()));
                    }
                }
                Err(e) => {
                    error!(flow_id, task_id, error = %e, "dependent lookup failed");
                }
            }
        }

        for task in next {
            self.dispatch(task).await;
        }
        if let Some((status, reason)) = terminal {
            self.finalize_flow(flow_id, status, &reason).await;
        }
    }

    /// Validate and persist a flow transition.
    ///
    /// The guard runs against the *stored* state, so a flow that already
    /// reached a terminal state can never be re-marked. Persisting retries
    /// transient store failures with increasing backoff; exhaustion surfaces
    /// the last error and leaves the flow for the next poll cycle.
    pub async fn set_flow_state(
        &self,
        flow_id: FlowId,
        state: FlowState,
        reason: &str,
    ) -> stratocore::Result<()> {
        let flow = self.backend.flow_by_id(flow_id).await?;
        if !flow.state.can_transition(state) {
            return Err(StateError::InvalidFlowTransition {
                id: flow_id,
                from: flow.state,
                to: state,
            }
            .into());
        }
        store::set_flow_state(self.backend.as_ref(), self.retry, flow_id, state, reason).await?;
        info!(flow_id, %state, "flow state changed");
        Ok(())
    }

    async fn finalize_flow(&self, flow_id: FlowId, status: FlowState, reason: &str) {
        if let Err(e) = self.set_flow_state(flow_id, status, reason).await {
            // Left as-is on purpose; the next reclaim cycle settles it.
            error!(flow_id, error = %e, "flow finalization failed");
        }
        self.graphs.write().await.remove(&flow_id);
        info!(flow_id, %status, "flow finalized");
    }

    async fn dispatch(&self, task: Task) {
        let task_id = task.id;
        if self.dispatch_tx.send(task).await.is_err() {
            // Executor intake is gone, which only happens during shutdown.
            warn!(task_id, "dispatch queue closed; dropping task");
        }
    }
}
