//! HTTP client for CloudWatch Logs
//!
//! Sends [`Post`]s exactly as built, with no retries: a failure is reported
//! to the caller, which decides what to do with it.

use std::time::Duration;

use super::logs::{Post, PutLogEventsResponse};
use crate::error::{Error, Result};

/// Async client for `PutLogEvents`
#[derive(Debug, Clone)]
pub struct LogsClient {
    http_client: reqwest::Client,
}

impl LogsClient {
    /// Create a client whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { http_client })
    }

    /// Send one post and parse the service response.
    ///
    /// An empty 2xx body is treated as an empty response.
    pub async fn send(&self, post: &Post) -> Result<PutLogEventsResponse> {
        let mut request = self.http_client.post(&post.url).body(post.body.clone());
        for (name, value) in &post.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Transport(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Transport(format!("failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(Error::Transport(format!(
                "API error ({}): {}",
                status,
                String::from_utf8_lossy(&body)
            )));
        }

        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(PutLogEventsResponse::default());
        }

        serde_json::from_slice(&body)
            .map_err(|e| Error::Transport(format!("failed to parse response: {}", e)))
    }
}
