use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::middleware;
use axum::routing::post;
use axum::{Json, Router};
use idempotency_gate::coordinator::{idempotency, IdempotencyCoordinator};
use idempotency_gate::error::Result;
use idempotency_gate::store::{CachedResponse, IdempotencyStore};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Store wrapper that counts every call, so tests can assert how often the
/// stage touched the backend.
pub struct CountingStore<S> {
    inner: S,
    pub lookups: AtomicUsize,
    pub saves: AtomicUsize,
    pub admits: AtomicUsize,
}

impl<S> CountingStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            lookups: AtomicUsize::new(0),
            saves: AtomicUsize::new(0),
            admits: AtomicUsize::new(0),
        }
    }

    pub fn total_calls(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
            + self.saves.load(Ordering::SeqCst)
            + self.admits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<S: IdempotencyStore> IdempotencyStore for CountingStore<S> {
    async fn lookup(&self, key: &str) -> Result<Option<CachedResponse>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.lookup(key).await
    }

    async fn save(
        &self,
        key: &str,
        response: CachedResponse,
        ttl: Option<Duration>,
    ) -> Result<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.inner.save(key, response, ttl).await
    }

    async fn admit(&self, key: &str, limit: u32) -> Result<bool> {
        self.admits.fetch_add(1, Ordering::SeqCst);
        self.inner.admit(key, limit).await
    }
}

/// Store whose every call fails, for exercising the failure policy.
pub struct FailingStore;

#[async_trait]
impl IdempotencyStore for FailingStore {
    async fn lookup(&self, _key: &str) -> Result<Option<CachedResponse>> {
        Err(anyhow::anyhow!("store offline").into())
    }

    async fn save(
        &self,
        _key: &str,
        _response: CachedResponse,
        _ttl: Option<Duration>,
    ) -> Result<()> {
        Err(anyhow::anyhow!("store offline").into())
    }

    async fn admit(&self, _key: &str, _limit: u32) -> Result<bool> {
        Err(anyhow::anyhow!("store offline").into())
    }
}

/// Router with a payment-style route behind the idempotency stage. The
/// handler mints a fresh sequence number per execution, so replays are
/// distinguishable from re-executions, and sleeps briefly to widen race
/// windows in concurrency tests.
pub fn payment_router(
    coordinator: Arc<IdempotencyCoordinator>,
    calls: Arc<AtomicUsize>,
    handler_delay: Duration,
) -> Router {
    Router::new()
        .route(
            "/payments",
            post(move || {
                let calls = Arc::clone(&calls);
                async move {
                    tokio::time::sleep(handler_delay).await;
                    let execution = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    (
                        StatusCode::CREATED,
                        Json(serde_json::json!({ "id": execution })),
                    )
                }
            }),
        )
        .layer(middleware::from_fn_with_state(coordinator, idempotency))
}

pub fn post_payment(key: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/payments")
        .header("content-type", "application/json");
    if let Some(key) = key {
        builder = builder.header("x-idempotency-key", key);
    }
    builder.body(Body::empty()).unwrap()
}

pub async fn body_json(body: Body) -> serde_json::Value {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
