//! Safety gateway port and its HTTP client.
//!
//! The safety service owns the equipment around the goniometer. Before the
//! arm moves through that space the orchestrator asks it to move everything
//! out of the way, and afterwards to put everything back.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

pub type SharedSafetyGateway = Arc<dyn SafetyGateway>;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum SafetyError {
    /// The service answered and reported an error
    #[error("{0}")]
    Failed(String),
    /// The service could not be reached
    #[error("safety request failed: {0}")]
    Request(String),
    /// The service answered with something other than an error list
    #[error("invalid safety response: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait SafetyGateway: Send + Sync {
    async fn move_to_safe_position(&self) -> Result<(), SafetyError>;

    async fn return_positions(&self) -> Result<(), SafetyError>;
}

#[derive(Debug, Deserialize)]
struct SafetyResponse {
    errors: Vec<SafetyResponseError>,
}

#[derive(Debug, Deserialize)]
struct SafetyResponseError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl SafetyResponse {
    fn into_result(self) -> Result<(), SafetyError> {
        match self.errors.into_iter().next() {
            None => Ok(()),
            Some(first) => Err(SafetyError::Failed(
                first
                    .message
                    .or(first.code)
                    .unwrap_or_else(|| "unknown error".to_string()),
            )),
        }
    }
}

/// Talks to the safety service over `PUT {base}/makesafe` and `PUT {base}/return`.
#[derive(Debug, Clone)]
pub struct HttpSafetyGateway {
    http: reqwest::Client,
    base_url: String,
}

impl HttpSafetyGateway {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, SafetyError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SafetyError::Request(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn put(&self, path: &str) -> Result<(), SafetyError> {
        let url = format!("{}/{}", self.base_url, path);
        tracing::debug!(url = %url, "Calling safety service");

        let response = self
            .http
            .put(&url)
            .send()
            .await
            .map_err(|e| SafetyError::Request(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SafetyError::Request(e.to_string()))?;

        // The error list is authoritative whatever the status code says.
        match serde_json::from_str::<SafetyResponse>(&body) {
            Ok(parsed) => parsed.into_result(),
            Err(_) if !status.is_success() => Err(SafetyError::Request(format!(
                "status {}: {}",
                status, body
            ))),
            Err(e) => Err(SafetyError::InvalidResponse(e.to_string())),
        }
    }
}

#[async_trait]
impl SafetyGateway for HttpSafetyGateway {
    async fn move_to_safe_position(&self) -> Result<(), SafetyError> {
        self.put("makesafe").await
    }

    async fn return_positions(&self) -> Result<(), SafetyError> {
        self.put("return").await
    }
}

/// Gateway for stations without a safety service. Every call succeeds.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSafetyGateway;

#[async_trait]
impl SafetyGateway for NoopSafetyGateway {
    async fn move_to_safe_position(&self) -> Result<(), SafetyError> {
        Ok(())
    }

    async fn return_positions(&self) -> Result<(), SafetyError> {
        Ok(())
    }
}
