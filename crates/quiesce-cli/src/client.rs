//! HTTP client for a running `quiesce serve`.
//!
//! Every call is idempotent, so a caller that gets a transient error
//! (`ClientError::is_retryable`) can resend it verbatim.

use std::time::Duration;

use quiesce_core::domain::{
    CompletionResult, Heartbeat, ProcessId, ProcessReport, RegistrationResult, TaskId,
};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;

use crate::api::{ErrorResponse, RESULT_HEADER, RegisterBody};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("invalid base url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with an error body.
    #[error("{status}: {message} ({code})")]
    Api {
        status: StatusCode,
        code: String,
        message: String,
    },

    #[error("unexpected response status {0}")]
    UnexpectedStatus(StatusCode),

    #[error("unrecognised result header '{0}'")]
    UnknownResult(String),
}

impl ClientError {
    /// Transport failures and 5xx answers are worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Http(err) => err.is_timeout() || err.is_connect(),
            ClientError::Api { status, .. } => status.is_server_error(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QuiesceClient {
    http: reqwest::Client,
    base_url: Url,
}

impl QuiesceClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let invalid = |reason: String| ClientError::InvalidUrl {
            url: base_url.to_string(),
            reason,
        };
        let parsed = Url::parse(base_url).map_err(|err| invalid(err.to_string()))?;
        if parsed.cannot_be_a_base() {
            return Err(invalid("not a base url".to_string()));
        }

        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: parsed,
        })
    }

    pub async fn health(&self) -> Result<(), ClientError> {
        let response = self.http.get(self.url(&["health"])).send().await?;
        match response.status() {
            StatusCode::OK => Ok(()),
            _ => Err(error_from(response).await),
        }
    }

    pub async fn register_task(
        &self,
        process_id: &ProcessId,
        task_id: &TaskId,
        heartbeat: Heartbeat,
    ) -> Result<RegistrationResult, ClientError> {
        let url = self.url(&["processes", process_id.as_str(), "tasks", task_id.as_str()]);
        let mut request = self.http.put(url);
        if heartbeat != Heartbeat::now() {
            request = request.json(&RegisterBody::from(heartbeat));
        }

        let response = request.send().await?;
        match response.status() {
            StatusCode::CREATED | StatusCode::OK | StatusCode::NO_CONTENT => {
                result_from(&response)
            }
            _ => Err(error_from(response).await),
        }
    }

    pub async fn complete_task(
        &self,
        process_id: &ProcessId,
        task_id: &TaskId,
    ) -> Result<CompletionResult, ClientError> {
        let url = self.url(&[
            "processes",
            process_id.as_str(),
            "tasks",
            task_id.as_str(),
            "completion",
        ]);

        let response = self.http.put(url).send().await?;
        match response.status() {
            StatusCode::CREATED | StatusCode::OK | StatusCode::NO_CONTENT => {
                result_from(&response)
            }
            _ => Err(error_from(response).await),
        }
    }

    pub async fn process_status(
        &self,
        process_id: &ProcessId,
    ) -> Result<ProcessReport, ClientError> {
        let response = self
            .http
            .get(self.url(&["processes", process_id.as_str()]))
            .send()
            .await?;
        match response.status() {
            StatusCode::OK => Ok(response.json().await?),
            _ => Err(error_from(response).await),
        }
    }

    /// Base url plus percent-encoded path segments.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }
}

/// Read the exact result from the `quiesce-result` header.
fn result_from<T: DeserializeOwned>(response: &reqwest::Response) -> Result<T, ClientError> {
    let Some(raw) = response.headers().get(RESULT_HEADER) else {
        return Err(ClientError::UnexpectedStatus(response.status()));
    };
    let name = raw.to_str().unwrap_or_default().to_string();
    serde_json::from_value(serde_json::Value::String(name.clone()))
        .map_err(|_| ClientError::UnknownResult(name))
}

async fn error_from(response: reqwest::Response) -> ClientError {
    let status = response.status();
    match response.json::<ErrorResponse>().await {
        Ok(body) => ClientError::Api {
            status,
            code: body.code,
            message: body.error,
        },
        Err(_) => ClientError::UnexpectedStatus(status),
    }
}
