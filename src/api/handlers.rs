use axum::{extract::State, http::StatusCode, Json};
use uuid::Uuid;

use crate::api::requests::CreatePaymentRequest;
use crate::api::responses::{HealthResponse, PaymentResponse, ServiceHealth};
use crate::error::AppError;

use super::routes::AppState;

/// Health check endpoint.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let redis_healthy = match &state.redis_client {
        Some(client) => client.get_multiplexed_async_connection().await.is_ok(),
        None => true,
    };
    let store_configured = state.store.is_some();

    let response = HealthResponse {
        status: if redis_healthy {
            "healthy".to_string()
        } else {
            "degraded".to_string()
        },
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now(),
        services: ServiceHealth {
            store: store_configured,
            redis: redis_healthy,
        },
    };

    Json(response)
}

/// Readiness check endpoint.
pub async fn readiness_check(State(state): State<AppState>) -> StatusCode {
    let redis_healthy = match &state.redis_client {
        Some(client) => client.get_multiplexed_async_connection().await.is_ok(),
        None => true,
    };

    if redis_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Liveness check endpoint.
pub async fn liveness_check() -> StatusCode {
    StatusCode::OK
}

/// Prometheus metrics endpoint.
pub async fn metrics_endpoint(State(state): State<AppState>) -> String {
    state
        .metrics_handle
        .map(|handle| handle.render())
        .unwrap_or_default()
}

/// Demo payment route. Each execution mints a fresh id, so a client
/// retrying with the same idempotency key can observe whether it was
/// replayed or re-executed.
pub async fn create_payment(
    Json(request): Json<CreatePaymentRequest>,
) -> Result<(StatusCode, Json<PaymentResponse>), AppError> {
    if request.currency.len() != 3 {
        return Err(AppError::Validation(
            "currency must be a three-letter code".to_string(),
        ));
    }
    if request.amount_minor <= 0 {
        return Err(AppError::Validation(
            "amount_minor must be positive".to_string(),
        ));
    }

    let response = PaymentResponse {
        id: Uuid::new_v4(),
        amount_minor: request.amount_minor,
        currency: request.currency.to_uppercase(),
        reference: request.reference,
        status: "accepted".to_string(),
        created_at: chrono::Utc::now(),
    };

    Ok((StatusCode::CREATED, Json(response)))
}
