use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use std::collections::{HashMap, HashSet};
use stratocore::{FlowId, FlowState, GraphError, Task, TaskId, TaskState};
use uuid::Uuid;

/// A task plus its position in the flow's dependency graph
#[derive(Debug, Clone)]
pub struct TaskNode {
    pub task: Task,
    /// Direct dependents, i.e. tasks listing this one in `depend_on`
    pub dependents: Vec<TaskId>,
}

/// In-memory DAG for one flow run.
///
/// Nodes live in an arena keyed by task id; edges are id lookups into the
/// arena, not owning references. The graph exists only while its flow is
/// `Running` and is discarded at finalization; after a restart it is rebuilt
/// from the backend by the next poll cycle.
#[derive(Debug)]
pub struct TaskGraph {
    pub flow_id: FlowId,
    /// Correlation id for this claim, carried through log events
    pub run_id: Uuid,
    /// First failure recorded against the flow; empty while none
    pub reason: String,
    nodes: HashMap<TaskId, TaskNode>,
    in_flight: HashSet<TaskId>,
}

impl TaskGraph {
    /// Build the dependency graph for one flow from its flat task list.
    ///
    /// Validates that every referenced dependency exists in the set and that
    /// the edges form a DAG. Violations are fatal to the flow and reported
    /// as typed [`GraphError`]s.
    pub fn build(flow_id: FlowId, run_id: Uuid, tasks: Vec<Task>) -> Result<Self, GraphError> {
        if tasks.is_empty() {
            return Err(GraphError::EmptyFlow(flow_id));
        }

        let ids: HashSet<TaskId> = tasks.iter().map(|t| t.id).collect();
        for task in &tasks {
            for &dep in &task.depend_on {
                if !ids.contains(&dep) {
                    return Err(GraphError::MissingDependency {
                        task_id: task.id,
                        depend_on: dep,
                    });
                }
            }
        }

        // Cycle check on a throwaway petgraph mirror; all traversal below
        // works on the id-keyed arena.
        let mut dag = DiGraph::<TaskId, ()>::new();
        let mut indices = HashMap::new();
        for task in &tasks {
            indices.insert(task.id, dag.add_node(task.id));
        }
        for task in &tasks {
            for &dep in &task.depend_on {
                dag.add_edge(indices[&dep], indices[&task.id], ());
            }
        }
        if toposort(&dag, None).is_err() {
            return Err(GraphError::CycleDetected(flow_id));
        }

        let mut nodes: HashMap<TaskId, TaskNode> = tasks
            .into_iter()
            .map(|t| {
                (
                    t.id,
                    TaskNode {
                        task: t,
                        dependents: Vec::new(),
                    },
                )
            })
            .collect();
        let edges: Vec<(TaskId, TaskId)> = nodes
            .values()
            .flat_map(|n| n.task.depend_on.iter().map(|&dep| (dep, n.task.id)))
            .collect();
        for (dep, dependent) in edges {
            if let Some(node) = nodes.get_mut(&dep) {
                node.dependents.push(dependent);
            }
        }

        // A reclaimed flow may already carry a persisted failure; keep its
        // reason so finalization does not lose the detail.
        let reason = nodes
            .values()
            .find(|n| n.task.state == TaskState::Failed && !n.task.reason.is_empty())
            .map(|n| n.task.reason.clone())
            .unwrap_or_default();

        Ok(Self {
            flow_id,
            run_id,
            reason,
            nodes,
            in_flight: HashSet::new(),
        })
    }

    /// Every node whose full dependency set is already `Success` and whose
    /// own state is `Pending`. Called once at claim time to seed the
    /// executor.
    pub fn executable_nodes(&self) -> Vec<Task> {
        self.nodes
            .values()
            .filter(|n| {
                n.task.state == TaskState::Pending
                    && !self.in_flight.contains(&n.task.id)
                    && self.deps_satisfied(&n.task)
            })
            .map(|n| n.task.clone())
            .collect()
    }

    /// Dependents of a just-completed node that became executable now that
    /// it finished; dependents with any unmet dependency are withheld. A
    /// node that did not reach `Success` unblocks nothing.
    pub fn unblocked_after(&self, id: TaskId) -> Result<Vec<Task>, GraphError> {
        let node = self.nodes.get(&id).ok_or(GraphError::UnknownTask(id))?;
        if node.task.state != TaskState::Success {
            return Ok(Vec::new());
        }
        Ok(node
            .dependents
            .iter()
            .filter_map(|dep| self.nodes.get(dep))
            .filter(|n| {
                n.task.state == TaskState::Pending
                    && !self.in_flight.contains(&n.task.id)
                    && self.deps_satisfied(&n.task)
            })
            .map(|n| n.task.clone())
            .collect())
    }

    /// Flow status rolled up from node states.
    ///
    /// Failure is infectious: one `Failed` node decides the flow even while
    /// sibling branches are still in flight. `Success` requires every node
    /// to have succeeded.
    pub fn status(&self) -> FlowState {
        let mut all_success = true;
        let mut all_pending = true;
        for node in self.nodes.values() {
            match node.task.state {
                TaskState::Failed => return FlowState::Failed,
                TaskState::Success => all_pending = false,
                TaskState::Pending => all_success = false,
                _ => {
                    all_success = false;
                    all_pending = false;
                }
            }
        }
        if all_success {
            FlowState::Success
        } else if all_pending && self.in_flight.is_empty() {
            FlowState::Pending
        } else {
            FlowState::Running
        }
    }

    /// Fold a finished node back into the arena, clearing it from the
    /// in-flight set and capturing the first failure reason.
    pub fn record_result(&mut self, task: Task) -> Result<(), GraphError> {
        if !self.nodes.contains_key(&task.id) {
            return Err(GraphError::UnknownTask(task.id));
        }
        self.in_flight.remove(&task.id);
        if task.state == TaskState::Failed && self.reason.is_empty() {
            self.reason = task.reason.clone();
        }
        if let Some(node) = self.nodes.get_mut(&task.id) {
            node.task = task;
        }
        Ok(())
    }

    pub fn mark_in_flight<I: IntoIterator<Item = TaskId>>(&mut self, ids: I) {
        self.in_flight.extend(ids);
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    /// Reset tasks a dead owner left mid-flight back to `Pending` so they
    /// run again from the top. Returns the ids that need persisting.
    pub fn reset_interrupted(&mut self) -> Vec<TaskId> {
        let mut reset = Vec::new();
        for node in self.nodes.values_mut() {
            if matches!(
                node.task.state,
                TaskState::Running | TaskState::BeforeSuccess | TaskState::BeforeFailed
            ) {
                node.task.state = TaskState::Pending;
                reset.push(node.task.id);
            }
        }
        reset
    }

    pub fn node(&self, id: TaskId) -> Option<&TaskNode> {
        self.nodes.get(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn deps_satisfied(&self, task: &Task) -> bool {
        task.depend_on.iter().all(|dep| {
            self.nodes
                .get(dep)
                .map(|n| n.task.state == TaskState::Success)
                .unwrap_or(false)
        })
    }
}
