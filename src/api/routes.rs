use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::coordinator::{idempotency, IdempotencyCoordinator};
use crate::pipeline::{propagate_correlation_id, translate_errors, CorrelationConfig};
use crate::store::IdempotencyStore;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Option<Arc<dyn IdempotencyStore>>,
    pub redis_client: Option<redis::Client>,
    pub metrics_handle: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(
        store: Option<Arc<dyn IdempotencyStore>>,
        redis_client: Option<redis::Client>,
    ) -> Self {
        Self {
            store,
            redis_client,
            metrics_handle: None,
        }
    }

    /// Adds metrics handle to the state.
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }
}

/// Creates the main router: the demo payment route behind the idempotency
/// stage, operational endpoints outside it, and the correlation and
/// error-translation stages wrapping everything.
pub fn create_router(
    state: AppState,
    coordinator: Arc<IdempotencyCoordinator>,
    correlation: CorrelationConfig,
) -> Router {
    Router::new()
        .route("/payments", post(handlers::create_payment))
        .route_layer(middleware::from_fn_with_state(coordinator, idempotency))
        // Operational endpoints
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/live", get(handlers::liveness_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        .layer(middleware::from_fn(translate_errors))
        .layer(middleware::from_fn_with_state(
            correlation,
            propagate_correlation_id,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
