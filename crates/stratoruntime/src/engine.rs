use crate::executor::Executor;
use crate::registry::ActionRegistry;
use crate::scheduler::Scheduler;
use crate::store::StoreRetry;
use std::sync::Arc;
use std::time::Duration;
use stratocore::{Backend, TaskId};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Tunables for one engine instance
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of executor workers
    pub workers: usize,
    /// Capacity of the dispatch and ready queues
    pub queue_capacity: usize,
    /// How often the scheduler polls the backend for a pending flow
    pub poll_interval: Duration,
    /// Bounded-retry policy for store state writes
    pub store_retry_attempts: u32,
    pub store_retry_base_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 64,
            poll_interval: Duration::from_secs(3),
            store_retry_attempts: 3,
            store_retry_base_delay: Duration::from_millis(100),
        }
    }
}

/// Wires the scheduler and executor over a backend and a populated action
/// registry, and owns their lifecycle.
///
/// Register every action before calling [`FlowEngine::start`]; the engine
/// polls as soon as it returns. Multiple engine replicas may run against the
/// same backend: the backend's atomic claim keeps them from stepping on each
/// other, so no leader election is required for correctness.
pub struct FlowEngine {
    scheduler: Arc<Scheduler>,
    executor: Executor,
    registry: Arc<ActionRegistry>,
    shutdown: CancellationToken,
    watcher: JoinHandle<()>,
}

impl FlowEngine {
    /// Spawn the scheduler loop and executor stages.
    pub fn start(
        backend: Arc<dyn Backend>,
        registry: Arc<ActionRegistry>,
        config: EngineConfig,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let retry = StoreRetry {
            attempts: config.store_retry_attempts,
            base_delay: config.store_retry_base_delay,
        };
        let (dispatch_tx, dispatch_rx) = mpsc::channel(config.queue_capacity.max(1));

        let scheduler = Arc::new(Scheduler::new(
            backend.clone(),
            dispatch_tx.clone(),
            retry,
        ));
        let executor = Executor::spawn(
            config.workers,
            config.queue_capacity,
            retry,
            backend,
            registry.clone(),
            scheduler.clone(),
            dispatch_tx,
            dispatch_rx,
            shutdown.clone(),
        );
        let watcher = tokio::spawn(
            scheduler
                .clone()
                .run(config.poll_interval, shutdown.clone()),
        );

        info!(workers = config.workers, "flow engine started");
        Self {
            scheduler,
            executor,
            registry,
            shutdown,
            watcher,
        }
    }

    /// The registry this engine resolves action names against
    pub fn registry(&self) -> &Arc<ActionRegistry> {
        &self.registry
    }

    /// The scheduler half, for embedders that drive polling themselves
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Abort the listed in-flight tasks; returns how many were actually
    /// in flight.
    pub async fn cancel_tasks(&self, ids: &[TaskId]) -> usize {
        self.executor.cancel_tasks(ids).await
    }

    /// Cooperative shutdown: stop polling and intake, then wait for every
    /// worker to drain. No task is abandoned mid-flight.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let _ = self.watcher.await;
        self.executor.join().await;
        info!("flow engine stopped");
    }
}
