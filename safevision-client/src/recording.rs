//! HTTP client for the recording API.
//!
//! ```text
//! POST {base}/api/recording/start   {"session_id": "..."}
//! POST {base}/api/recording/stop    {"session_id": "..."}
//! ```

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use safevision_core::recording::{parse_start_reply, parse_stop_reply};
use safevision_core::{RecordingError, RecordingService, RecordingStarted, RecordingSummary};

#[derive(Serialize)]
struct SessionRequest<'a> {
    session_id: &'a str,
}

#[derive(Debug, Clone)]
pub struct HttpRecordingClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpRecordingClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RecordingError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RecordingError::Unreachable(e.to_string()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POST the session id and return the body of a 2xx reply.
    async fn post(&self, action: &str, session_id: &str) -> Result<String, RecordingError> {
        let url = format!("{}/api/recording/{action}", self.base_url);
        debug!(%url, session_id, "recording request");

        let response = self
            .client
            .post(&url)
            .json(&SessionRequest { session_id })
            .send()
            .await
            .map_err(map_reqwest)?;

        let status = response.status();
        let body = response.text().await.map_err(map_reqwest)?;
        if !status.is_success() {
            return Err(RecordingError::Server {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }
        Ok(body)
    }
}

#[async_trait]
impl RecordingService for HttpRecordingClient {
    async fn start_recording(&self, session_id: &str) -> Result<RecordingStarted, RecordingError> {
        let body = self.post("start", session_id).await?;
        parse_start_reply(&body)
    }

    async fn stop_recording(&self, session_id: &str) -> Result<RecordingSummary, RecordingError> {
        let body = self.post("stop", session_id).await?;
        parse_stop_reply(&body)
    }
}

fn map_reqwest(err: reqwest::Error) -> RecordingError {
    if err.is_timeout() || err.is_connect() {
        RecordingError::Unreachable(err.to_string())
    } else {
        RecordingError::InvalidResponse(err.to_string())
    }
}

/// The `"error"` field of a JSON error body, or the raw body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}
