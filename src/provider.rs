//! Generation and repair collaborators
//!
//! Both services answer with the same newline-delimited event stream (see
//! [`crate::stream`]). Generation yields events to the session as they
//! arrive; repair is collapsed into the last `code` payload it carried.

use crate::error::{ApiError, RepairError};
use crate::stream::{collect_events, decode_stream, StreamEvent};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Body of a repair request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairRequest {
    /// Error message plus a stack excerpt, already bounded.
    pub runtime_error: String,
    pub failed_code: String,
    pub user_id: Option<String>,
}

/// Body of a generation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub prompt: String,
    pub project_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Source currently in the project, for follow-up prompts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_code: Option<String>,
}

/// Live generation events
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, ApiError>> + Send>>;

/// Service that proposes a fixed candidate for failing code.
#[async_trait]
pub trait RepairClient: Send + Sync {
    fn name(&self) -> &str;

    /// Returns the repaired source, possibly empty when the service produced
    /// no code. Callers decide whether the candidate is usable.
    async fn repair(&self, request: RepairRequest) -> Result<String, RepairError>;
}

/// Service that streams newly generated component source.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, request: GenerationRequest) -> Result<EventStream, ApiError>;
}

#[derive(Debug, Clone, Copy)]
pub struct HttpTimeouts {
    pub connect: Duration,
    pub request: Duration,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self {
            connect: DEFAULT_CONNECT_TIMEOUT,
            request: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

fn build_http_client(timeouts: HttpTimeouts) -> Result<Client, ApiError> {
    Client::builder()
        .connect_timeout(timeouts.connect)
        .timeout(timeouts.request)
        .build()
        .map_err(|e| ApiError::ProviderError(format!("Failed to create HTTP client: {}", e)))
}

fn map_http_error(error: reqwest::Error) -> ApiError {
    if let Some(status) = error.status() {
        map_status(status, error.to_string())
    } else if error.is_timeout() {
        ApiError::ProviderRequestFailed(format!("Request timeout: {}", error))
    } else if error.is_connect() {
        ApiError::ProviderRequestFailed(format!("Connection error: {}", error))
    } else {
        ApiError::ProviderError(format!("HTTP error: {}", error))
    }
}

fn map_status(status: StatusCode, body: String) -> ApiError {
    match status.as_u16() {
        401 | 403 => ApiError::ProviderAuthFailed(format!("Authentication failed: {}", body)),
        _ => ApiError::ProviderRequestFailed(format!(
            "Request failed with status {}: {}",
            status, body
        )),
    }
}

fn map_repair_status(status: StatusCode, body: String) -> RepairError {
    match status.as_u16() {
        401 | 403 => RepairError::Unauthorized(body),
        code => RepairError::Status { status: code, body },
    }
}

async fn error_body(response: reqwest::Response) -> String {
    response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string())
}

/// Repair service over HTTP.
pub struct HttpRepairClient {
    client: Client,
    url: String,
    api_key: Option<String>,
}

impl HttpRepairClient {
    pub fn new(
        url: impl Into<String>,
        api_key: Option<String>,
        timeouts: HttpTimeouts,
    ) -> Result<Self, ApiError> {
        Ok(Self {
            client: build_http_client(timeouts)?,
            url: url.into(),
            api_key,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl RepairClient for HttpRepairClient {
    fn name(&self) -> &str {
        "http"
    }

    async fn repair(&self, request: RepairRequest) -> Result<String, RepairError> {
        if request.user_id.as_deref().map_or(true, |id| id.trim().is_empty()) {
            return Err(RepairError::Unauthorized(
                "no user is associated with this request".to_string(),
            ));
        }

        let mut builder = self.client.post(&self.url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| RepairError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = error_body(response).await;
            warn!(status = status.as_u16(), "Repair service rejected request");
            return Err(map_repair_status(status, body));
        }

        let summary = collect_events(response.bytes_stream(), |event| {
            if let Some(message) = event.message_text() {
                debug!(message, "repair stream");
            }
        })
        .await
        .map_err(|e| RepairError::Transport(e.to_string()))?;

        if summary.events == 0 {
            return Err(RepairError::EmptyBody);
        }
        match summary.code {
            Some(code) => Ok(code),
            None => match summary.error {
                Some(message) => Err(RepairError::Stream(message)),
                None => Ok(String::new()),
            },
        }
    }
}

/// Generation service over HTTP.
pub struct HttpGenerationClient {
    client: Client,
    url: String,
    api_key: Option<String>,
}

impl HttpGenerationClient {
    pub fn new(
        url: impl Into<String>,
        api_key: Option<String>,
        timeouts: HttpTimeouts,
    ) -> Result<Self, ApiError> {
        Ok(Self {
            client: build_http_client(timeouts)?,
            url: url.into(),
            api_key,
        })
    }
}

#[async_trait]
impl GenerationClient for HttpGenerationClient {
    fn name(&self) -> &str {
        "http"
    }

    async fn generate(&self, request: GenerationRequest) -> Result<EventStream, ApiError> {
        let mut builder = self.client.post(&self.url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await.map_err(map_http_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = error_body(response).await;
            return Err(map_status(status, body));
        }

        debug!(url = %self.url, "Generation stream opened");
        let events = decode_stream(response.bytes_stream()).map(|item| item.map_err(map_http_error));
        Ok(Box::pin(events))
    }
}
