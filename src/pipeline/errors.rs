use crate::error::{ProblemDetails, PROBLEM_CONTENT_TYPE};
use crate::pipeline::CorrelationId;
use axum::body::to_bytes;
use axum::extract::Request;
use axum::http::header;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::error;

const LOGGED_BODY_LIMIT: usize = 64 * 1024;

/// Converts unhandled server errors into problem documents.
///
/// Any 5xx that is not already `application/problem+json` is logged with the
/// request's correlation id and rewritten to an RFC 7807 body carrying that
/// id as `traceId`. Responses that already speak problem+json pass through
/// untouched, so stages below may shape their own error documents.
pub async fn translate_errors(req: Request, next: Next) -> Response {
    let correlation_id = req
        .extensions()
        .get::<CorrelationId>()
        .map(|id| id.0.clone());

    let response = next.run(req).await;

    if !response.status().is_server_error() {
        return response;
    }

    let already_problem = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.starts_with(PROBLEM_CONTENT_TYPE))
        .unwrap_or(false);

    if already_problem {
        error!(
            status = %response.status(),
            correlation_id = correlation_id.as_deref().unwrap_or("-"),
            "server error"
        );
        return response;
    }

    let (parts, body) = response.into_parts();
    let body_excerpt = match to_bytes(body, LOGGED_BODY_LIMIT).await {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(_) => "<unreadable body>".to_string(),
    };

    error!(
        status = %parts.status,
        correlation_id = correlation_id.as_deref().unwrap_or("-"),
        body = %body_excerpt,
        "server error"
    );

    let mut problem =
        ProblemDetails::internal_server_error("An unexpected error occurred on the server.");
    problem.status = parts.status.as_u16();
    if let Some(id) = correlation_id {
        problem = problem.with_trace_id(id);
    }

    problem.into_response()
}
