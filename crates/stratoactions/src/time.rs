use async_trait::async_trait;
use stratocore::{Action, ActionContext, ActionError};
use tokio::time::{sleep, Duration};

/// Delay for a configurable number of milliseconds.
///
/// The attempt deadline still applies: a sleep longer than the task's
/// timeout is cut off by the engine and counted against the retry budget.
pub struct SleepAction;

#[async_trait]
impl Action for SleepAction {
    fn name(&self) -> &str {
        "time.sleep"
    }

    async fn run(&self, ctx: &ActionContext) -> Result<(), ActionError> {
        let delay_ms = ctx
            .params
            .get("delay_ms")
            .and_then(|v| v.as_u64())
            .unwrap_or(1000);
        sleep(Duration::from_millis(delay_ms)).await;
        Ok(())
    }
}
