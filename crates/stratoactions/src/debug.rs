use async_trait::async_trait;
use stratocore::{Action, ActionContext, ActionError};
use tracing::info;

/// Logs its params and succeeds; handy for wiring tests and as a tracer
/// inside larger flows.
pub struct LogAction;

#[async_trait]
impl Action for LogAction {
    fn name(&self) -> &str {
        "debug.log"
    }

    async fn run(&self, ctx: &ActionContext) -> Result<(), ActionError> {
        let message = ctx
            .params
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("(no message)");
        info!(
            flow_id = ctx.flow_id,
            task_id = ctx.task_id,
            "{}",
            message
        );
        Ok(())
    }
}
