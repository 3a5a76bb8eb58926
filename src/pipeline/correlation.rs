use crate::error::AppError;
use axum::extract::{Request, State};
use axum::http::{HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::Instrument;
use uuid::Uuid;

/// Configuration for the correlation-id stage.
#[derive(Debug, Clone)]
pub struct CorrelationConfig {
    pub header_name: String,
    pub include_in_response: bool,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            header_name: "x-correlation-id".to_string(),
            include_in_response: true,
        }
    }
}

/// Request-scoped correlation identifier, available to downstream stages
/// via request extensions.
#[derive(Debug, Clone)]
pub struct CorrelationId(pub String);

/// Stamps every request with a correlation id.
///
/// A supplied header value is adopted as-is; a blank one is rejected as a
/// validation error. Absent, a fresh identifier is generated. The id rides
/// in request extensions and the surrounding tracing span, and is echoed in
/// the response header when configured.
pub async fn propagate_correlation_id(
    State(config): State<CorrelationConfig>,
    mut req: Request,
    next: Next,
) -> Response {
    let supplied = req
        .headers()
        .get(config.header_name.as_str())
        .map(|value| value.to_str().unwrap_or("").trim().to_string());

    let correlation_id = match supplied {
        Some(value) if value.is_empty() => {
            return AppError::Validation(
                "correlation id header is present but blank".to_string(),
            )
            .into_response();
        }
        Some(value) => value,
        None => Uuid::new_v4().simple().to_string(),
    };

    req.extensions_mut()
        .insert(CorrelationId(correlation_id.clone()));

    let span = tracing::info_span!("request", correlation_id = %correlation_id);
    let mut response = next.run(req).instrument(span).await;

    if config.include_in_response {
        if let (Ok(name), Ok(value)) = (
            HeaderName::try_from(config.header_name.as_str()),
            HeaderValue::from_str(&correlation_id),
        ) {
            response.headers_mut().insert(name, value);
        }
    }

    response
}
