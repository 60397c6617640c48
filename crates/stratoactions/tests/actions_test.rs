// crates/stratoactions/tests/actions_test.rs

use std::time::{Duration, Instant};
use stratoactions::{register_all, HttpProbeAction, LogAction, SleepAction};
use stratocore::{Action, ActionContext, ActionError};
use stratoruntime::ActionRegistry;
use tokio_util::sync::CancellationToken;

fn ctx(params: serde_json::Value) -> ActionContext {
    ActionContext {
        flow_id: 1,
        task_id: 1,
        params,
        cancellation: CancellationToken::new(),
    }
}

#[test]
fn register_all_covers_the_standard_set() {
    let registry = ActionRegistry::new();
    register_all(&registry);

    let mut names = registry.action_names();
    names.sort();
    assert_eq!(names, vec!["debug.log", "http.probe", "time.sleep"]);
}

#[tokio::test]
async fn log_action_accepts_any_params() {
    let action = LogAction;
    assert!(action
        .run(&ctx(serde_json::json!({ "message": "hello" })))
        .await
        .is_ok());
    assert!(action.run(&ctx(serde_json::Value::Null)).await.is_ok());
}

#[tokio::test]
async fn sleep_action_waits_for_the_configured_delay() {
    let started = Instant::now();
    SleepAction
        .run(&ctx(serde_json::json!({ "delay_ms": 50 })))
        .await
        .unwrap();
    assert!(started.elapsed() >= Duration::from_millis(50));
}

#[tokio::test]
async fn http_probe_requires_a_url() {
    let err = HttpProbeAction::new()
        .run(&ctx(serde_json::Value::Null))
        .await
        .unwrap_err();
    assert!(matches!(err, ActionError::Failed(_)));
}

#[tokio::test]
#[ignore] // Run only with outbound network access
async fn http_probe_hits_a_live_endpoint() {
    HttpProbeAction::new()
        .run(&ctx(serde_json::json!({ "url": "https://example.com" })))
        .await
        .unwrap();
}
