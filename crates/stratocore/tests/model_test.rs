// crates/stratocore/tests/model_test.rs

use std::sync::Arc;
use std::time::Duration;
use stratocore::{Backend, BackendError, FlowState, MemoryBackend, TaskSpec, TaskState};

#[test]
fn flow_transitions_follow_the_state_machine() {
    assert!(FlowState::Pending.can_transition(FlowState::Running));
    assert!(FlowState::Running.can_transition(FlowState::Success));
    assert!(FlowState::Running.can_transition(FlowState::Failed));

    // Terminal states are final, and a flow never skips the claim.
    assert!(!FlowState::Pending.can_transition(FlowState::Success));
    assert!(!FlowState::Pending.can_transition(FlowState::Failed));
    assert!(!FlowState::Success.can_transition(FlowState::Running));
    assert!(!FlowState::Failed.can_transition(FlowState::Running));
    assert!(!FlowState::Success.can_transition(FlowState::Failed));
    assert!(!FlowState::Running.can_transition(FlowState::Pending));
}

#[test]
fn task_transitions_follow_the_state_machine() {
    use TaskState::*;

    assert!(Pending.can_transition(Running));
    assert!(Running.can_transition(BeforeSuccess));
    assert!(BeforeSuccess.can_transition(Success));

    assert!(Pending.can_transition(BeforeFailed));
    assert!(Running.can_transition(BeforeFailed));
    assert!(BeforeSuccess.can_transition(BeforeFailed));
    assert!(BeforeFailed.can_transition(Failed));

    // Retries and crash recovery re-enter the dispatch state.
    assert!(Running.can_transition(Pending));
    assert!(BeforeSuccess.can_transition(Pending));
    assert!(BeforeFailed.can_transition(Pending));

    // Terminal states are final.
    assert!(!Success.can_transition(Pending));
    assert!(!Success.can_transition(Running));
    assert!(!Failed.can_transition(Pending));
    assert!(!Failed.can_transition(BeforeFailed));
    assert!(!Pending.can_transition(Success));
}

#[test]
fn submit_rejects_bad_specs() {
    let backend = MemoryBackend::new();

    assert!(matches!(
        backend.submit_flow(vec![]),
        Err(BackendError::InvalidSpec(_))
    ));
    assert!(matches!(
        backend.submit_flow(vec![TaskSpec::new("noop").with_timeout(0)]),
        Err(BackendError::InvalidSpec(_))
    ));
    assert!(matches!(
        backend.submit_flow(vec![TaskSpec::new("")]),
        Err(BackendError::InvalidSpec(_))
    ));
    // Dangling and self-referential positions are rejected at the door.
    assert!(matches!(
        backend.submit_flow(vec![TaskSpec::new("noop").with_depend_on(vec![5])]),
        Err(BackendError::InvalidSpec(_))
    ));
    assert!(matches!(
        backend.submit_flow(vec![TaskSpec::new("noop").with_depend_on(vec![0])]),
        Err(BackendError::InvalidSpec(_))
    ));
}

#[tokio::test]
async fn submit_rewrites_positions_to_task_ids() {
    let backend = MemoryBackend::new();
    let flow_id = backend
        .submit_flow(vec![
            TaskSpec::new("first"),
            TaskSpec::new("second").with_depend_on(vec![0]),
        ])
        .unwrap();

    let tasks = backend.tasks_by_flow(flow_id).await.unwrap();
    assert_eq!(tasks.len(), 2);
    assert!(tasks[0].depend_on.is_empty());
    assert_eq!(tasks[1].depend_on, vec![tasks[0].id]);
    assert!(tasks.iter().all(|t| t.state == TaskState::Pending));
}

#[tokio::test]
async fn claim_marks_flow_running() {
    let backend = MemoryBackend::new();
    let flow_id = backend.submit_flow(vec![TaskSpec::new("noop")]).unwrap();

    let claimed = backend.consume_one_pending_flow().await.unwrap().unwrap();
    assert_eq!(claimed.id, flow_id);
    assert_eq!(claimed.state, FlowState::Running);

    // The same flow is not handed out twice while its owner is live.
    assert!(backend.consume_one_pending_flow().await.unwrap().is_none());
}

#[tokio::test]
async fn concurrent_claims_have_exactly_one_winner() {
    let backend = Arc::new(MemoryBackend::new());
    backend.submit_flow(vec![TaskSpec::new("noop")]).unwrap();

    let a = tokio::spawn({
        let backend = backend.clone();
        async move { backend.consume_one_pending_flow().await.unwrap() }
    });
    let b = tokio::spawn({
        let backend = backend.clone();
        async move { backend.consume_one_pending_flow().await.unwrap() }
    });

    let (a, b) = (a.await.unwrap(), b.await.unwrap());
    assert!(
        a.is_some() != b.is_some(),
        "exactly one claimer may win: {:?} / {:?}",
        a,
        b
    );
}

#[tokio::test]
async fn abandoned_running_flow_is_reclaimed() {
    let backend = MemoryBackend::with_liveness(Duration::from_millis(0));
    let flow_id = backend.submit_flow(vec![TaskSpec::new("noop")]).unwrap();

    let first = backend.consume_one_pending_flow().await.unwrap().unwrap();
    assert_eq!(first.state, FlowState::Running);

    // Owner never finished; with the liveness window elapsed the flow is
    // handed out again, still Running.
    let second = backend.consume_one_pending_flow().await.unwrap().unwrap();
    assert_eq!(second.id, flow_id);
    assert_eq!(second.state, FlowState::Running);
}

#[tokio::test]
async fn terminal_flow_is_never_reclaimed() {
    let backend = MemoryBackend::with_liveness(Duration::from_millis(0));
    let flow_id = backend.submit_flow(vec![TaskSpec::new("noop")]).unwrap();

    backend.consume_one_pending_flow().await.unwrap().unwrap();
    backend
        .set_flow_state(flow_id, FlowState::Success, "")
        .await
        .unwrap();

    assert!(backend.consume_one_pending_flow().await.unwrap().is_none());
}

#[tokio::test]
async fn state_writes_update_entities() {
    let backend = MemoryBackend::new();
    let flow_id = backend.submit_flow(vec![TaskSpec::new("noop")]).unwrap();
    let task_id = backend.tasks_by_flow(flow_id).await.unwrap()[0].id;

    backend
        .set_task_state(task_id, TaskState::Failed, "boom")
        .await
        .unwrap();
    let task = backend.task(task_id).unwrap();
    assert_eq!(task.state, TaskState::Failed);
    assert_eq!(task.reason, "boom");

    assert!(matches!(
        backend.set_flow_state(999, FlowState::Failed, "").await,
        Err(BackendError::FlowNotFound(999))
    ));
    assert!(matches!(
        backend.set_task_state(999, TaskState::Failed, "").await,
        Err(BackendError::TaskNotFound(999))
    ));
}
