use crate::registry::ActionRegistry;
use crate::scheduler::Scheduler;
use crate::store::{self, StoreRetry};
use futures::future;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use stratocore::{Action, ActionContext, ActionError, Backend, Task, TaskId, TaskState};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// A dispatched node with the live execution attributes assigned at intake
struct ReadyTask {
    task: Task,
    scope: CancellationToken,
    deadline: Instant,
}

/// How one drive of a task ended
enum TaskOutcome {
    /// Terminal, or abandoned mid-drive after store-write exhaustion;
    /// either way the scheduler must hear about it
    Done(Task),
    /// Budget left; re-enters the dispatch queue
    Retry(Task),
}

/// Run half of the engine: bounded-concurrency execution of ready nodes.
///
/// An intake stage assigns each dispatched node a cancellable, deadline-bound
/// scope and records the cancellation handle keyed by task id; a fixed pool
/// of workers drains the ready queue, drives each task through its lifecycle
/// hooks, and hands the node back to the scheduler. Shutdown is cooperative:
/// intake stops first, then workers drain what is already queued.
pub struct Executor {
    cancellations: Arc<RwLock<HashMap<TaskId, CancellationToken>>>,
    handles: Vec<JoinHandle<()>>,
}

impl Executor {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn spawn(
        workers: usize,
        queue_capacity: usize,
        retry: StoreRetry,
        backend: Arc<dyn Backend>,
        registry: Arc<ActionRegistry>,
        scheduler: Arc<Scheduler>,
        dispatch_tx: mpsc::Sender<Task>,
        dispatch_rx: mpsc::Receiver<Task>,
        shutdown: CancellationToken,
    ) -> Self {
        let cancellations: Arc<RwLock<HashMap<TaskId, CancellationToken>>> =
            Arc::new(RwLock::new(HashMap::new()));
        let (ready_tx, ready_rx) = mpsc::channel::<ReadyTask>(queue_capacity.max(1));
        let ready_rx = Arc::new(Mutex::new(ready_rx));

        let mut handles = Vec::with_capacity(workers + 1);
        handles.push(tokio::spawn(intake(
            dispatch_rx,
            ready_tx,
            cancellations.clone(),
            shutdown.clone(),
        )));
        for index in 0..workers.max(1) {
            handles.push(tokio::spawn(worker(
                index,
                ready_rx.clone(),
                backend.clone(),
                registry.clone(),
                scheduler.clone(),
                dispatch_tx.clone(),
                cancellations.clone(),
                retry,
                shutdown.clone(),
            )));
        }

        Self {
            cancellations,
            handles,
        }
    }

    /// Abort the listed in-flight tasks. A cancelled task observes its scope
    /// from inside the running hook and is treated as timed out for
    /// retry-budget purposes. Unknown ids are ignored.
    pub async fn cancel_tasks(&self, ids: &[TaskId]) -> usize {
        let mut map = self.cancellations.write().await;
        let mut cancelled = 0;
        for id in ids {
            if let Some(scope) = map.remove(id) {
                scope.cancel();
                cancelled += 1;
                info!(task_id = id, "task cancelled");
            }
        }
        cancelled
    }

    /// Wait for the intake stage and every worker to drain and stop.
    pub(crate) async fn join(self) {
        future::join_all(self.handles).await;
    }
}

/// Pre-processing stage: attach a cancellation scope and deadline to each
/// dispatched node, guarding against double-dispatch of a task already in
/// flight, then push it onto the ready queue.
async fn intake(
    mut dispatch_rx: mpsc::Receiver<Task>,
    ready_tx: mpsc::Sender<ReadyTask>,
    cancellations: Arc<RwLock<HashMap<TaskId, CancellationToken>>>,
    shutdown: CancellationToken,
) {
    loop {
        let task = tokio::select! {
            _ = shutdown.cancelled() => break,
            task = dispatch_rx.recv() => match task {
                Some(task) => task,
                None => break,
            },
        };

        let scope = CancellationToken::new();
        {
            let mut map = cancellations.write().await;
            if map.contains_key(&task.id) {
                warn!(task_id = task.id, "task already in flight; dropping duplicate dispatch");
                continue;
            }
            map.insert(task.id, scope.clone());
        }

        let deadline = Instant::now() + Duration::from_secs(task.timeout_secs);
        let task_id = task.id;
        if ready_tx
            .send(ReadyTask {
                task,
                scope,
                deadline,
            })
            .await
            .is_err()
        {
            cancellations.write().await.remove(&task_id);
            break;
        }
    }
    debug!("executor intake stopped");
}

/// One worker: pop ready nodes, drive each through its lifecycle, release
/// the cancellation handle, and report back to the scheduler. The loop ends
/// when the ready queue is closed and drained, so nothing queued is ever
/// silently abandoned.
#[allow(clippy::too_many_arguments)]
async fn worker(
    index: usize,
    ready_rx: Arc<Mutex<mpsc::Receiver<ReadyTask>>>,
    backend: Arc<dyn Backend>,
    registry: Arc<ActionRegistry>,
    scheduler: Arc<Scheduler>,
    dispatch_tx: mpsc::Sender<Task>,
    cancellations: Arc<RwLock<HashMap<TaskId, CancellationToken>>>,
    retry: StoreRetry,
    shutdown: CancellationToken,
) {
    loop {
        let ready = { ready_rx.lock().await.recv().await };
        let Some(ReadyTask {
            task,
            scope,
            deadline,
        }) = ready
        else {
            break;
        };

        let task_id = task.id;
        let outcome = drive_task(task, scope, deadline, backend.as_ref(), &registry, retry).await;
        cancellations.write().await.remove(&task_id);

        match outcome {
            TaskOutcome::Done(task) => scheduler.on_task_done(task).await,
            TaskOutcome::Retry(task) => {
                tokio::select! {
                    sent = dispatch_tx.send(task) => {
                        if sent.is_err() {
                            warn!(task_id, "dispatch queue closed; retry left pending for reclaim");
                        }
                    }
                    _ = shutdown.cancelled() => {
                        warn!(task_id, "shutdown raced a retry; task left pending for reclaim");
                    }
                }
            }
        }
    }
    debug!(worker = index, "executor worker stopped");
}

/// Drive one task through its lifecycle, persisting every state transition.
///
/// The state names the hook that runs next; a hook success advances the
/// state, a hook error (including deadline expiry and cancellation) goes to
/// retry evaluation. Tasks already terminal are a no-op, which makes
/// duplicate dispatch harmless.
async fn drive_task(
    mut task: Task,
    scope: CancellationToken,
    deadline: Instant,
    backend: &dyn Backend,
    registry: &ActionRegistry,
    retry: StoreRetry,
) -> TaskOutcome {
    if task.state.is_terminal() {
        debug!(task_id = task.id, state = %task.state, "task already settled; nothing to drive");
        return TaskOutcome::Done(task);
    }

    let Some(action) = registry.resolve(&task.action_name) else {
        // Fatal to the task, not the process; there are no hooks to run.
        let err = ActionError::Unregistered(task.action_name.clone());
        error!(task_id = task.id, action = %task.action_name, "cannot resolve action");
        task.reason = err.to_string();
        return finish_failure(task, None, backend, retry).await;
    };

    let ctx = ActionContext {
        flow_id: task.flow_id,
        task_id: task.id,
        params: task.params.clone(),
        cancellation: scope.clone(),
    };

    loop {
        let next = match task.state {
            TaskState::Pending => {
                run_hook(action.run_before(&ctx), &scope, deadline, task.timeout_secs)
                    .await
                    .map(|_| TaskState::Running)
            }
            TaskState::Running => run_hook(action.run(&ctx), &scope, deadline, task.timeout_secs)
                .await
                .map(|_| TaskState::BeforeSuccess),
            TaskState::BeforeSuccess => run_hook(
                action.run_before_success(&ctx),
                &scope,
                deadline,
                task.timeout_secs,
            )
            .await
            .map(|_| TaskState::Success),
            TaskState::BeforeFailed => {
                // Interrupted failure path handed straight back; finish it.
                return finish_failure(task, Some((action.as_ref(), &ctx)), backend, retry).await;
            }
            TaskState::Success | TaskState::Failed => return TaskOutcome::Done(task),
        };

        match next {
            Ok(state) => {
                if let Err(e) =
                    store::set_task_state(backend, retry, task.id, state, &task.reason).await
                {
                    error!(task_id = task.id, error = %e, "state write exhausted retries; abandoning drive");
                    return TaskOutcome::Done(task);
                }
                task.state = state;
                if state == TaskState::Success {
                    info!(task_id = task.id, "task succeeded");
                    return TaskOutcome::Done(task);
                }
            }
            Err(err) => {
                return evaluate_retry(task, action.as_ref(), &ctx, err, backend, retry).await
            }
        }
    }
}

/// Decide what a failed attempt means: consume one unit of retry budget and
/// re-enter `Pending`, or cross into the failure path.
async fn evaluate_retry(
    mut task: Task,
    action: &dyn Action,
    ctx: &ActionContext,
    err: ActionError,
    backend: &dyn Backend,
    retry: StoreRetry,
) -> TaskOutcome {
    warn!(task_id = task.id, error = %err, "task attempt failed");
    task.reason = err.to_string();

    if task.retry_count == 0 {
        return finish_failure(task, Some((action, ctx)), backend, retry).await;
    }

    // Cleanup hooks run outside the attempt deadline and scope.
    if let Err(e) = action.retry_before(&cleanup_context(ctx)).await {
        warn!(task_id = task.id, error = %e, "retry_before hook failed");
    }
    task.retry_count -= 1;
    if let Err(e) =
        store::set_task_state(backend, retry, task.id, TaskState::Pending, &task.reason).await
    {
        error!(task_id = task.id, error = %e, "state write exhausted retries; abandoning drive");
        return TaskOutcome::Done(task);
    }
    task.state = TaskState::Pending;
    debug!(
        task_id = task.id,
        remaining = task.retry_count,
        "task re-queued for retry"
    );
    TaskOutcome::Retry(task)
}

/// Walk the failure path: `BeforeFailed`, the `run_before_failed` hook, then
/// terminal `Failed`. `task.reason` must already carry the failure detail.
async fn finish_failure(
    mut task: Task,
    action: Option<(&dyn Action, &ActionContext)>,
    backend: &dyn Backend,
    retry: StoreRetry,
) -> TaskOutcome {
    if task.state != TaskState::BeforeFailed {
        if let Err(e) = store::set_task_state(
            backend,
            retry,
            task.id,
            TaskState::BeforeFailed,
            &task.reason,
        )
        .await
        {
            error!(task_id = task.id, error = %e, "state write exhausted retries; abandoning drive");
            return TaskOutcome::Done(task);
        }
        task.state = TaskState::BeforeFailed;
    }

    if let Some((action, ctx)) = action {
        if let Err(e) = action.run_before_failed(&cleanup_context(ctx)).await {
            warn!(task_id = task.id, error = %e, "run_before_failed hook failed");
        }
    }

    if let Err(e) =
        store::set_task_state(backend, retry, task.id, TaskState::Failed, &task.reason).await
    {
        error!(task_id = task.id, error = %e, "state write exhausted retries; abandoning drive");
        return TaskOutcome::Done(task);
    }
    task.state = TaskState::Failed;
    warn!(task_id = task.id, reason = %task.reason, "task failed");
    TaskOutcome::Done(task)
}

/// Bound one hook by the attempt deadline and the task's cancellation scope.
/// Both interruptions look like hook errors to the caller, which is what
/// feeds them into the shared retry-budget evaluation.
async fn run_hook<F>(
    hook: F,
    scope: &CancellationToken,
    deadline: Instant,
    timeout_secs: u64,
) -> Result<(), ActionError>
where
    F: Future<Output = Result<(), ActionError>>,
{
    tokio::select! {
        result = hook => result,
        _ = scope.cancelled() => Err(ActionError::Cancelled),
        _ = tokio::time::sleep_until(deadline) => Err(ActionError::Timeout {
            seconds: timeout_secs,
        }),
    }
}

fn cleanup_context(ctx: &ActionContext) -> ActionContext {
    ActionContext {
        cancellation: CancellationToken::new(),
        ..ctx.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use stratocore::{MemoryBackend, TaskSpec};

    /// Counts every hook invocation
    struct CountingAction {
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Action for CountingAction {
        fn name(&self) -> &str {
            "test.counting"
        }

        async fn run_before(&self, _ctx: &ActionContext) -> Result<(), ActionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn run(&self, _ctx: &ActionContext) -> Result<(), ActionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn run_before_success(&self, _ctx: &ActionContext) -> Result<(), ActionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn run_before_failed(&self, _ctx: &ActionContext) -> Result<(), ActionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn retry_before(&self, _ctx: &ActionContext) -> Result<(), ActionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn quick_retry() -> StoreRetry {
        StoreRetry {
            attempts: 1,
            base_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn settled_tasks_are_not_driven_again() {
        for settled in [TaskState::Success, TaskState::Failed] {
            let backend = MemoryBackend::new();
            let flow_id = backend
                .submit_flow(vec![TaskSpec::new("test.counting")])
                .unwrap();
            let mut task = backend.tasks_by_flow(flow_id).await.unwrap().remove(0);
            let task_id = task.id;
            task.state = settled;

            let calls = Arc::new(AtomicU32::new(0));
            let registry = ActionRegistry::new();
            registry.register(Arc::new(CountingAction {
                calls: calls.clone(),
            }));

            let outcome = drive_task(
                task,
                CancellationToken::new(),
                Instant::now() + Duration::from_secs(5),
                &backend,
                &registry,
                quick_retry(),
            )
            .await;

            let TaskOutcome::Done(task) = outcome else {
                panic!("expected a settled hand-back");
            };
            assert_eq!(task.state, settled);
            assert_eq!(calls.load(Ordering::SeqCst), 0, "no hook may re-run");
            // The store was never touched either.
            assert_eq!(backend.task(task_id).unwrap().state, TaskState::Pending);
        }
    }

    #[tokio::test]
    async fn unresolved_action_walks_the_failure_path() {
        let backend = MemoryBackend::new();
        let flow_id = backend
            .submit_flow(vec![TaskSpec::new("compute.ghost")])
            .unwrap();
        let task = backend.tasks_by_flow(flow_id).await.unwrap().remove(0);
        let task_id = task.id;

        let registry = ActionRegistry::new();
        let outcome = drive_task(
            task,
            CancellationToken::new(),
            Instant::now() + Duration::from_secs(5),
            &backend,
            &registry,
            quick_retry(),
        )
        .await;

        let TaskOutcome::Done(task) = outcome else {
            panic!("expected a terminal hand-back");
        };
        assert_eq!(task.state, TaskState::Failed);
        assert!(task.reason.contains("no action registered"));

        let stored = backend.task(task_id).unwrap();
        assert_eq!(stored.state, TaskState::Failed);
        assert!(stored.reason.contains("compute.ghost"));
    }
}
