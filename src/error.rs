use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let problem = match &self {
            AppError::Validation(msg) => ProblemDetails::new(
                "Request validation failed.",
                status,
                msg.clone(),
                "https://tools.ietf.org/html/rfc7231#section-6.5.1",
            ),
            _ => {
                tracing::error!("request failed: {}", self);
                ProblemDetails::internal_server_error(self.to_string())
            }
        };
        problem.into_response()
    }
}

/// RFC 7807 problem document returned on terminal errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemDetails {
    pub title: String,
    pub status: u16,
    pub detail: String,
    #[serde(rename = "type")]
    pub problem_type: String,
    #[serde(rename = "traceId", skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

pub const PROBLEM_CONTENT_TYPE: &str = "application/problem+json";

impl ProblemDetails {
    pub fn new(
        title: impl Into<String>,
        status: StatusCode,
        detail: impl Into<String>,
        problem_type: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            status: status.as_u16(),
            detail: detail.into(),
            problem_type: problem_type.into(),
            trace_id: None,
        }
    }

    /// Denial document for an exhausted admission window.
    pub fn rate_limit_exceeded() -> Self {
        Self::new(
            "Rate Limit Exceeded",
            StatusCode::TOO_MANY_REQUESTS,
            "Request limit reached for this idempotency key.",
            "https://tools.ietf.org/html/rfc6585#section-4",
        )
    }

    pub fn internal_server_error(detail: impl Into<String>) -> Self {
        Self::new(
            "An internal server error has occurred.",
            StatusCode::INTERNAL_SERVER_ERROR,
            detail,
            "https://tools.ietf.org/html/rfc7231#section-6.6.1",
        )
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }
}

impl IntoResponse for ProblemDetails {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (
            status,
            [(header::CONTENT_TYPE, PROBLEM_CONTENT_TYPE)],
            Json(self),
        )
            .into_response()
    }
}
