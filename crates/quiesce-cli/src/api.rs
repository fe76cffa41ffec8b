//! HTTP API over a `TerminationDetector`.
//!
//! | route | operation |
//! |---|---|
//! | `PUT /processes/:process_id/tasks/:task_id` | register / heartbeat |
//! | `PUT /processes/:process_id/tasks/:task_id/completion` | complete |
//! | `GET /processes/:process_id` | status |
//! | `GET /health` | liveness |
//!
//! Both PUT routes answer 201 when they created the record, 200 when they
//! changed it and 204 when nothing observable changed. The `quiesce-result`
//! header carries the exact result so clients can tell 204s apart.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use quiesce_core::app::TerminationDetector;
use quiesce_core::domain::{
    CompletionResult, DetectorError, Heartbeat, ProcessId, ProcessReport, RegistrationResult,
    TaskId, TaskRecord,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

pub const RESULT_HEADER: &str = "quiesce-result";

#[derive(Clone)]
pub struct AppState {
    pub detector: TerminationDetector,
}

pub fn router(detector: TerminationDetector) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/processes/:process_id", get(process_status))
        .route("/processes/:process_id/tasks/:task_id", put(register_task))
        .route(
            "/processes/:process_id/tasks/:task_id/completion",
            put(complete_task),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { detector })
}

/// Optional body of the register route.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reported_at: Option<DateTime<Utc>>,

    /// Per-task staleness deadline.
    #[serde(default, alias = "expirationTime", skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
}

impl From<Heartbeat> for RegisterBody {
    fn from(heartbeat: Heartbeat) -> Self {
        Self {
            reported_at: heartbeat.reported_at,
            deadline: heartbeat.deadline,
        }
    }
}

impl From<RegisterBody> for Heartbeat {
    fn from(body: RegisterBody) -> Self {
        Self {
            reported_at: body.reported_at,
            deadline: body.deadline,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Detector(#[from] DetectorError),

    #[error("invalid request body: {0}")]
    InvalidBody(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::Detector(DetectorError::InvalidInput { .. }) => {
                (StatusCode::BAD_REQUEST, "invalid_input")
            }
            ApiError::Detector(DetectorError::StoreUnavailable(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, "store_unavailable")
            }
            ApiError::Detector(DetectorError::Contention { .. }) => {
                (StatusCode::SERVICE_UNAVAILABLE, "contention")
            }
            ApiError::InvalidBody(_) => (StatusCode::BAD_REQUEST, "invalid_body"),
        };

        if status.is_server_error() {
            tracing::warn!(error = %self, code, "request failed");
        }

        let body = Json(ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
        });
        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;

async fn health() -> &'static str {
    "ok"
}

async fn process_status(
    State(state): State<AppState>,
    Path(process_id): Path<String>,
) -> Result<Json<ProcessReport>> {
    let process_id = ProcessId::parse(process_id)?;
    let report = state.detector.process_status(&process_id).await?;
    Ok(Json(report))
}

async fn register_task(
    State(state): State<AppState>,
    Path((process_id, task_id)): Path<(String, String)>,
    body: Bytes,
) -> Result<Response> {
    let process_id = ProcessId::parse(process_id)?;
    let task_id = TaskId::parse(task_id)?;
    let body: RegisterBody = if body.iter().all(u8::is_ascii_whitespace) {
        RegisterBody::default()
    } else {
        serde_json::from_slice(&body).map_err(|err| ApiError::InvalidBody(err.to_string()))?
    };

    let registration = state
        .detector
        .register_task(&process_id, &task_id, body.into())
        .await?;

    let status = match registration.result {
        RegistrationResult::Created => StatusCode::CREATED,
        RegistrationResult::Refreshed => StatusCode::OK,
        RegistrationResult::Unchanged | RegistrationResult::AlreadyCompleted => {
            StatusCode::NO_CONTENT
        }
    };
    Ok(task_response(status, result_name(&registration.result), registration.record))
}

async fn complete_task(
    State(state): State<AppState>,
    Path((process_id, task_id)): Path<(String, String)>,
) -> Result<Response> {
    let process_id = ProcessId::parse(process_id)?;
    let task_id = TaskId::parse(task_id)?;

    let completion = state.detector.complete_task(&process_id, &task_id).await?;

    let status = match completion.result {
        CompletionResult::CreatedCompleted => StatusCode::CREATED,
        CompletionResult::Completed => StatusCode::OK,
        CompletionResult::AlreadyCompleted => StatusCode::NO_CONTENT,
    };
    Ok(task_response(status, result_name(&completion.result), completion.record))
}

/// 204 never carries a body.
fn task_response(status: StatusCode, result: String, record: TaskRecord) -> Response {
    let mut response = if status == StatusCode::NO_CONTENT {
        status.into_response()
    } else {
        (status, Json(record)).into_response()
    };
    if let Ok(value) = HeaderValue::from_str(&result) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(RESULT_HEADER), value);
    }
    response
}

/// `SCREAMING_SNAKE_CASE` name of a result enum, as serde renders it.
fn result_name<T: Serialize>(result: &T) -> String {
    match serde_json::to_value(result) {
        Ok(serde_json::Value::String(name)) => name,
        _ => String::new(),
    }
}
