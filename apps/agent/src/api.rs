//! Best-effort reporting client for the control plane.
//!
//! Deliberately thin: bearer auth when a token is configured, a client-side
//! timeout, and a boolean outcome so callers never special-case transport
//! errors.

use std::time::Duration;

use serde::Serialize;

use crate::monitoring::scheduler::CheckEvent;

/// Outbound status report, one per check result.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport<'a> {
    pub project_id: &'a str,
    pub runtime_name: &'a str,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<&'a str>,
    #[serde(skip_serializing_if = "metadata_is_empty")]
    pub metadata: &'a serde_json::Map<String, serde_json::Value>,
}

fn metadata_is_empty(metadata: &&serde_json::Map<String, serde_json::Value>) -> bool {
    metadata.is_empty()
}

impl<'a> StatusReport<'a> {
    pub fn from_event(event: &'a CheckEvent) -> Self {
        Self {
            project_id: &event.target.project_id,
            runtime_name: &event.target.name,
            success: event.result.success,
            response_time_ms: event.result.response_time_ms,
            status_code: event.result.status_code,
            error_message: event.result.error_message.as_deref(),
            metadata: &event.result.metadata,
        }
    }
}

pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url: base_url.into(), token })
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    /// POST a payload to `path`. Returns whether the control plane accepted
    /// it; any non-2xx or transport failure is logged and reported as false.
    pub async fn post(&self, path: &str, payload: &impl Serialize) -> bool {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), path.trim_start_matches('/'));
        let mut request = self.client.post(&url).json(payload);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                tracing::warn!(%url, status = %response.status(), "Control plane rejected report");
                false
            }
            Err(e) => {
                tracing::warn!(%url, "Failed to reach control plane: {e}");
                false
            }
        }
    }

    /// Report one health-check result.
    pub async fn report_status(&self, report: &StatusReport<'_>) -> bool {
        self.post("api/reports", report).await
    }
}
