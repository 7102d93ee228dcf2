//! Webhook sink: observational, never authoritative — a
//! failed or slow webhook call never affects a reload's outcome.

use serde::Serialize;
use std::time::Duration;
use tracing::warn;

const USER_AGENT: &str = "Reloader/2.0";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize)]
pub struct WorkloadSummary {
    pub kind: String,
    pub name: String,
    pub namespace: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct WebhookPayload {
    pub kind: String,
    pub namespace: String,
    #[serde(rename = "resourceName")]
    pub resource_name: String,
    #[serde(rename = "resourceType")]
    pub resource_type: String,
    pub hash: String,
    pub timestamp: String,
    pub workloads: Vec<WorkloadSummary>,
}

pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    /// `None` if no URL is configured, matching "a missing/empty URL
    /// disables the sink silently". `timeout` defaults to 30s
    /// when not overridden by `webhook.timeoutSecs` in config.
    pub fn new(url: Option<String>, timeout: Option<Duration>) -> Option<Self> {
        let url = url.filter(|u| !u.trim().is_empty())?;
        let client = reqwest::Client::builder()
            .timeout(timeout.unwrap_or(DEFAULT_TIMEOUT))
            .user_agent(USER_AGENT)
            .build()
            .expect("reqwest client builder with a timeout and UA never fails");
        Some(WebhookSink { client, url })
    }

    /// Returns whether the call landed in `[200, 300)`, so the caller can
    /// count failures without this sink needing a `Notifier` reference of
    /// its own.
    pub async fn post(&self, payload: &WebhookPayload) -> bool {
        match self.client.post(&self.url).json(payload).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!(status = %response.status(), url = %self.url, "webhook returned non-2xx status");
                false
            }
            Err(err) => {
                warn!(error = %err, url = %self.url, "webhook request failed");
                false
            }
        }
    }
}
