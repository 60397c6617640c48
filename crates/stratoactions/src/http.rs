use async_trait::async_trait;
use stratocore::{Action, ActionContext, ActionError};
use tracing::debug;

/// GET a URL and fail unless the response status is 2xx. Useful as a
/// readiness gate between provisioning steps.
pub struct HttpProbeAction {
    client: reqwest::Client,
}

impl HttpProbeAction {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpProbeAction {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Action for HttpProbeAction {
    fn name(&self) -> &str {
        "http.probe"
    }

    async fn run(&self, ctx: &ActionContext) -> Result<(), ActionError> {
        let url = ctx
            .params
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ActionError::Failed("http.probe requires a 'url' param".into()))?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ActionError::Failed(format!("probe request failed: {}", e)))?;

        debug!(task_id = ctx.task_id, url, status = %response.status(), "probe response");
        if !response.status().is_success() {
            return Err(ActionError::Failed(format!(
                "probe returned {} for {}",
                response.status(),
                url
            )));
        }
        Ok(())
    }
}
